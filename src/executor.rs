//! Executor trait and the request/outcome types it operates on.
//!
//! The worker does not know how a call is carried out. An executor takes a
//! parsed [`ExecutionRequest`] and returns either the outcome of the call or
//! an [`ExecutionFault`] with whatever trace the runtime captured.

mod process;

pub use process::ProcessExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single function invocation requested by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Name of the function to call.
    pub function_name: String,

    /// Module the function lives in.
    pub function_module: String,

    /// Source file that defines the module.
    #[serde(default)]
    pub filepath: String,

    /// Extra import paths to make visible to the callee.
    #[serde(default)]
    pub syspaths: Vec<String>,

    /// Positional arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,

    /// Keyword arguments.
    #[serde(default)]
    pub kwarguments: Map<String, Value>,
}

/// What a completed call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The call finished by raising; `result` holds the raised value.
    #[serde(default)]
    pub is_exception: bool,

    /// Return value (or raised value when `is_exception` is set).
    #[serde(default)]
    pub result: Value,

    /// Positional arguments as observed after the call returned.
    #[serde(default)]
    pub arguments_after: Vec<Value>,

    /// Captured standard output of the call.
    #[serde(default)]
    pub stdout: String,
}

/// The executor could not carry out the call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionFault {
    /// Short description of what went wrong.
    pub message: String,

    /// Trace captured by the runtime, if any.
    pub traceback: String,
}

impl ExecutionFault {
    /// Create a fault carrying a captured trace.
    pub fn new(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: traceback.into(),
        }
    }

    /// Create a fault from an error chain when no runtime trace exists.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::new(err.to_string(), format!("{err:?}"))
    }
}

/// Carries out parsed requests.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one request.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionFault>;
}
