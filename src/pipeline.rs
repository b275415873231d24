//! Request pipeline: message body in, response payload out.
//!
//! Two stages, each with its own containment:
//! 1. decode → parse → execute. Any fault becomes a `fail` response carrying
//!    the full diagnostic.
//! 2. serialize. A fault becomes a `fail` response with an empty diagnostic.
//!    The serializer's identity state is reset when this stage ends, on every
//!    path.
//!
//! [`Pipeline::process`] is infallible: every body yields exactly one payload.

pub mod json;

pub use json::{JsonRequestParser, JsonResponseSerializer};

use std::error::Error as _;
use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::executor::{ExecutionFault, ExecutionOutcome, ExecutionRequest, Executor};

/// Status marker carried by failed responses.
pub const FAIL_STATUS: &str = "fail";

/// Sent when even the empty fail response cannot be serialized.
pub const FALLBACK_FAIL_PAYLOAD: &str = r#"{"status":"fail","exception":""}"#;

/// One response per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResponse {
    /// The call completed (possibly by raising inside the callee).
    Success(ExecutionOutcome),
    /// The request could not be carried out.
    Fail {
        /// Captured diagnostic; empty when the diagnostic itself was lost.
        exception: String,
    },
}

impl ExecutionResponse {
    /// Build a `fail` response carrying `exception` as its diagnostic.
    pub fn fail(exception: impl Into<String>) -> Self {
        Self::Fail {
            exception: exception.into(),
        }
    }

    /// Whether this is the `fail` variant.
    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }
}

/// The request text was not a valid request.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid request JSON")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// The response could not be turned into wire text.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode response")]
    Json(#[from] serde_json::Error),

    #[error("value nesting exceeds depth {max}")]
    TooDeep { max: usize },
}

/// Fault raised by the parse+execute stage.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error("request body is not valid UTF-8")]
    Decode(#[from] std::str::Utf8Error),

    #[error("failed to parse request")]
    Parse(#[from] ParseError),

    #[error("execution failed")]
    Execution(#[from] ExecutionFault),
}

impl PipelineFault {
    /// Full diagnostic: the error chain, then the executor's trace if one exists.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let _ = write!(out, "\ncaused by: {cause}");
            source = cause.source();
        }
        if let Self::Execution(fault) = self {
            if !fault.traceback.is_empty() {
                out.push('\n');
                out.push_str(&fault.traceback);
            }
        }
        out
    }
}

/// Turns request text into a structured request.
pub trait RequestParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<ExecutionRequest, ParseError>;
}

/// Turns responses into wire text.
///
/// Implementations may keep identity state across a `serialize` call (shared
/// references, interned objects). That state must not survive into the next
/// request; the pipeline calls [`reset`](Self::reset) after every request.
pub trait ResponseSerializer: Send + Sync {
    fn serialize(&mut self, response: &ExecutionResponse) -> Result<String, SerializeError>;

    /// Drop all identity state. Must be idempotent.
    fn reset(&mut self);
}

/// Scoped serializer access that resets on drop.
struct ResetOnDrop<'a>(&'a mut dyn ResponseSerializer);

impl ResetOnDrop<'_> {
    fn serialize(&mut self, response: &ExecutionResponse) -> Result<String, SerializeError> {
        self.0.serialize(response)
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Parser, executor and serializer for one session.
pub struct Pipeline {
    parser: Box<dyn RequestParser>,
    executor: Box<dyn Executor>,
    serializer: Box<dyn ResponseSerializer>,
}

impl Pipeline {
    /// Assemble a pipeline from its three collaborators.
    pub fn new(
        parser: impl RequestParser + 'static,
        executor: impl Executor + 'static,
        serializer: impl ResponseSerializer + 'static,
    ) -> Self {
        Self {
            parser: Box::new(parser),
            executor: Box::new(executor),
            serializer: Box::new(serializer),
        }
    }

    /// Process one message body into one response payload.
    pub async fn process(&mut self, body: &[u8]) -> Vec<u8> {
        let response = match self.execute_stage(body).await {
            Ok(response) => response,
            Err(fault) => {
                debug!(error = %fault, body_len = body.len(), "Request failed");
                ExecutionResponse::fail(fault.diagnostic())
            }
        };
        debug!(fail = response.is_fail(), "Response ready");

        let payload = self.serialize_stage(&response);
        debug!(size = payload.len(), "Serialized response");
        payload.into_bytes()
    }

    async fn execute_stage(&self, body: &[u8]) -> Result<ExecutionResponse, PipelineFault> {
        let text = std::str::from_utf8(body)?;
        let request = self.parser.parse(text)?;
        debug!(?request, "Parsed request");
        let outcome = self.executor.execute(&request).await?;
        Ok(ExecutionResponse::Success(outcome))
    }

    fn serialize_stage(&mut self, response: &ExecutionResponse) -> String {
        let mut serializer = ResetOnDrop(self.serializer.as_mut());

        match serializer.serialize(response) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Failed to serialize response, sending empty fail");
                serializer
                    .serialize(&ExecutionResponse::fail(String::new()))
                    .unwrap_or_else(|err| {
                        warn!(error = %err, "Failed to serialize fail response");
                        FALLBACK_FAIL_PAYLOAD.to_string()
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    /// Returns the first argument as the result.
    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(
            &self,
            request: &ExecutionRequest,
        ) -> Result<ExecutionOutcome, ExecutionFault> {
            Ok(ExecutionOutcome {
                is_exception: false,
                result: request.arguments.first().cloned().unwrap_or(Value::Null),
                arguments_after: request.arguments.clone(),
                stdout: String::new(),
            })
        }
    }

    struct RaisingExecutor;

    #[async_trait]
    impl Executor for RaisingExecutor {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<ExecutionOutcome, ExecutionFault> {
            Err(ExecutionFault::new(
                "callee raised",
                "Traceback (most recent call last):\nValueError: boom",
            ))
        }
    }

    /// Serializer that counts resets and can be told to fail.
    struct ScriptedSerializer {
        resets: Arc<AtomicUsize>,
        fail_success: bool,
        fail_all: bool,
    }

    impl ScriptedSerializer {
        fn new(resets: &Arc<AtomicUsize>) -> Self {
            Self {
                resets: Arc::clone(resets),
                fail_success: false,
                fail_all: false,
            }
        }
    }

    impl ResponseSerializer for ScriptedSerializer {
        fn serialize(&mut self, response: &ExecutionResponse) -> Result<String, SerializeError> {
            if self.fail_all || (self.fail_success && !response.is_fail()) {
                return Err(SerializeError::TooDeep { max: 0 });
            }
            Ok(serde_json::to_string(response)?)
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn parse_payload(payload: &[u8]) -> Value {
        serde_json::from_slice(payload).unwrap()
    }

    const REQUEST: &str =
        r#"{"function_name": "f", "function_module": "m", "arguments": [{"a": 1}]}"#;

    #[tokio::test]
    async fn success_response() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut pipeline =
            Pipeline::new(JsonRequestParser, EchoExecutor, ScriptedSerializer::new(&resets));

        let payload = parse_payload(&pipeline.process(REQUEST.as_bytes()).await);
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["result"], json!({"a": 1}));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execution_fault_carries_traceback() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut pipeline =
            Pipeline::new(JsonRequestParser, RaisingExecutor, ScriptedSerializer::new(&resets));

        let payload = parse_payload(&pipeline.process(REQUEST.as_bytes()).await);
        assert_eq!(payload["status"], FAIL_STATUS);
        let exception = payload["exception"].as_str().unwrap();
        assert!(exception.contains("callee raised"));
        assert!(exception.contains("ValueError: boom"));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_fault_becomes_fail() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut pipeline =
            Pipeline::new(JsonRequestParser, EchoExecutor, ScriptedSerializer::new(&resets));

        let payload = parse_payload(&pipeline.process(b"hello").await);
        assert_eq!(payload["status"], FAIL_STATUS);
        let exception = payload["exception"].as_str().unwrap();
        assert!(exception.starts_with("failed to parse request"));
        assert!(exception.contains("caused by: invalid request JSON"));
    }

    #[tokio::test]
    async fn invalid_utf8_becomes_fail() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut pipeline =
            Pipeline::new(JsonRequestParser, EchoExecutor, ScriptedSerializer::new(&resets));

        let payload = parse_payload(&pipeline.process(&[0xff, 0xfe, b'{']).await);
        assert_eq!(payload["status"], FAIL_STATUS);
        assert!(payload["exception"]
            .as_str()
            .unwrap()
            .contains("not valid UTF-8"));
    }

    #[tokio::test]
    async fn serialize_fault_sends_empty_fail_and_resets_once() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut serializer = ScriptedSerializer::new(&resets);
        serializer.fail_success = true;
        let mut pipeline = Pipeline::new(JsonRequestParser, EchoExecutor, serializer);

        let payload = parse_payload(&pipeline.process(REQUEST.as_bytes()).await);
        assert_eq!(payload, json!({"status": "fail", "exception": ""}));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serializer_broken_entirely_uses_fallback() {
        let resets = Arc::new(AtomicUsize::new(0));
        let mut serializer = ScriptedSerializer::new(&resets);
        serializer.fail_all = true;
        let mut pipeline = Pipeline::new(JsonRequestParser, RaisingExecutor, serializer);

        let payload = pipeline.process(REQUEST.as_bytes()).await;
        assert_eq!(payload, FALLBACK_FAIL_PAYLOAD.as_bytes());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identical_requests_get_identical_payloads() {
        let mut pipeline =
            Pipeline::new(JsonRequestParser, EchoExecutor, JsonResponseSerializer::new());

        let first = pipeline.process(REQUEST.as_bytes()).await;
        let second = pipeline.process(REQUEST.as_bytes()).await;
        assert_eq!(first, second);

        let payload = parse_payload(&second);
        assert_eq!(payload["memory"].as_object().unwrap().len(), 1);
        assert_eq!(payload["result_id"], "0");
    }

    #[test]
    fn fail_response_shape() {
        let json = serde_json::to_value(ExecutionResponse::fail("trace")).unwrap();
        assert_eq!(json, json!({"status": "fail", "exception": "trace"}));
    }
}
