//! Worker configuration.
//!
//! Loaded from an optional JSON file; command-line flags override whatever
//! the file provides. Every field except the executor command has a default.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;

/// Top-level configuration for the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Peer to connect to.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// How requests are executed.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Largest request body the worker accepts, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Address of the peer the worker dials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: u16,
}

/// External executor process settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutorConfig {
    /// Program run once per request.
    #[serde(default)]
    pub command: String,

    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Maximum execution time in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            executor: ExecutorConfig::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Check that the configuration is usable for a session.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.connection.port != 0, "No peer port configured");
        anyhow::ensure!(
            !self.executor.command.is_empty(),
            "No executor command configured"
        );
        anyhow::ensure!(
            self.executor.timeout_seconds > 0,
            "executor timeout_seconds must be positive"
        );
        anyhow::ensure!(self.max_message_size > 0, "max_message_size must be positive");
        Ok(())
    }
}

fn default_host() -> String {
    "localhost".into()
}

const fn default_timeout() -> u64 {
    30
}

const fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}
