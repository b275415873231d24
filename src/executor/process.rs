//! Subprocess executor.
//!
//! Runs a configured command once per request: the request JSON goes to the
//! child's stdin, the outcome JSON comes back on its stdout. A non-zero exit
//! status is a fault whose traceback is the child's stderr.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{ExecutionFault, ExecutionOutcome, ExecutionRequest, Executor};
use crate::config::ExecutorConfig;

/// Executor that hands each request to a fresh child process.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

/// Raw result of one child run.
struct ChildOutput {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ProcessExecutor {
    /// Create an executor from configuration.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    async fn run_child(&self, input: &[u8]) -> Result<ChildOutput> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn executor: {}", self.command))?;

        let stdin = child.stdin.take().context("Failed to open stdin")?;
        // Pipes are taken out so `child` stays here for kill-on-timeout
        let mut child_stdout = child.stdout.take().context("Failed to open stdout")?;
        let mut child_stderr = child.stderr.take().context("Failed to open stderr")?;

        // Feeding stdin runs alongside draining stdout/stderr, all under the
        // timeout: a child that never reads its input or fills its output pipe
        // first cannot wedge the write.
        let write_input = async move {
            let mut stdin = stdin;
            let result = stdin.write_all(input).await;
            drop(stdin); // EOF tells the child the request is complete
            match result {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Executor closed stdin before reading the whole request");
                    Ok(())
                }
                other => other,
            }
        };

        let io_all = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (w, r1, r2) = tokio::join!(
                write_input,
                child_stdout.read_to_end(&mut stdout_buf),
                child_stderr.read_to_end(&mut stderr_buf),
            );
            w.context("Failed to write request to stdin")?;
            r1.context("Failed to read stdout")?;
            r2.context("Failed to read stderr")?;
            Ok::<_, anyhow::Error>((stdout_buf, stderr_buf))
        };

        let (stdout, stderr) = if let Ok(result) = tokio::time::timeout(self.timeout, io_all).await
        {
            result?
        } else {
            let _ = child.kill().await;
            anyhow::bail!("Executor timed out after {}s", self.timeout.as_secs());
        };

        let status = child.wait().await.context("Failed to wait for executor")?;

        Ok(ChildOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    #[instrument(skip_all, fields(function = %request.function_name, module = %request.function_module))]
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionFault> {
        let input = serde_json::to_vec(request)
            .context("Failed to encode request for executor")
            .map_err(|e| ExecutionFault::from_error(&e))?;

        let output = self
            .run_child(&input)
            .await
            .map_err(|e| ExecutionFault::from_error(&e))?;

        debug!(exit_code = output.exit_code, "Executor finished");

        if output.exit_code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(ExecutionFault::new(
                format!("Executor exited with status {}", output.exit_code),
                stderr,
            ));
        }

        serde_json::from_slice(&output.stdout)
            .context("Failed to parse executor output")
            .map_err(|e| ExecutionFault::from_error(&e))
    }
}
