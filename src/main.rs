//! remote-exec-worker
//!
//! Dials the peer, then answers framed execution requests on that one
//! connection until the peer sends `STOP` or the connection drops.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remote_exec_worker::config::Config;
use remote_exec_worker::executor::ProcessExecutor;
use remote_exec_worker::pipeline::{JsonRequestParser, JsonResponseSerializer, Pipeline};
use remote_exec_worker::session::Session;

#[derive(Parser, Debug)]
#[command(name = "remote-exec-worker")]
#[command(about = "Worker answering framed remote-execution requests over one connection")]
struct Args {
    /// Peer host to connect to
    host: Option<String>,

    /// Peer port to connect to
    port: Option<u16>,

    /// JSON configuration file (flags override its values)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Program run once per request
    #[arg(long)]
    executor: Option<String>,

    /// Argument passed to the executor program (repeatable)
    #[arg(long = "executor-arg", allow_hyphen_values = true)]
    executor_args: Vec<String>,

    /// Maximum execution time per request, in seconds
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Largest accepted request body, in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.connection.host = host;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(command) = self.executor {
            config.executor.command = command;
        }
        if !self.executor_args.is_empty() {
            config.executor.args = self.executor_args;
        }
        if let Some(timeout) = self.timeout_seconds {
            config.executor.timeout_seconds = timeout;
        }
        if let Some(max) = self.max_message_size {
            config.max_message_size = max;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_file.as_ref())?;

    let config = args.into_config().context("Failed to load configuration")?;

    info!(
        host = %config.connection.host,
        port = config.connection.port,
        executor = %config.executor.command,
        "Loaded configuration"
    );

    let pipeline = Pipeline::new(
        JsonRequestParser,
        ProcessExecutor::new(&config.executor),
        JsonResponseSerializer::new(),
    );

    let session = Session::connect(&config.connection, pipeline, config.max_message_size).await?;
    let summary = session.run().await.context("Session terminated abnormally")?;

    info!(requests = summary.requests_served, "All done");
    Ok(())
}
