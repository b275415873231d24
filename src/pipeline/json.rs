//! JSON request parser and memory-table response serializer.
//!
//! Successful responses do not embed values inline. Each distinct value in
//! the outcome is stored once in a `memory` table under a sequential id and
//! referenced by that id:
//!
//! ```json
//! {"status":"success","is_exception":false,"stdout":"",
//!  "memory":{"0":[1,2],"1":3},"result_id":"1","arguments_ids":["0"]}
//! ```
//!
//! The id table lives in the serializer between calls, so it has to be
//! reset before the next request or ids and entries leak across responses.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::{ExecutionResponse, ParseError, RequestParser, ResponseSerializer, SerializeError};
use crate::executor::{ExecutionOutcome, ExecutionRequest};

/// Nesting limit for serialized values. Leaves headroom under the 128-level
/// recursion limit common JSON readers (serde_json included) enforce.
pub const DEFAULT_MAX_DEPTH: usize = 120;

/// Parses requests encoded as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRequestParser;

impl RequestParser for JsonRequestParser {
    fn parse(&self, text: &str) -> Result<ExecutionRequest, ParseError> {
        let request: ExecutionRequest = serde_json::from_str(text)?;
        if request.function_name.is_empty() {
            return Err(ParseError::Invalid("function_name is empty".into()));
        }
        Ok(request)
    }
}

/// Serializes responses, interning values into a per-request memory table.
#[derive(Debug)]
pub struct JsonResponseSerializer {
    /// Canonical JSON text → id.
    ids: HashMap<String, String>,
    /// Interned values, indexed by id.
    memory: Vec<Value>,
    max_depth: usize,
}

#[derive(Serialize)]
struct SuccessPayload<'a> {
    status: &'static str,
    is_exception: bool,
    stdout: &'a str,
    memory: Map<String, Value>,
    result_id: String,
    arguments_ids: Vec<String>,
}

impl Default for JsonResponseSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonResponseSerializer {
    /// Create a serializer with the default nesting limit.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create a serializer that rejects values nested deeper than `max_depth`.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            ids: HashMap::new(),
            memory: Vec::new(),
            max_depth,
        }
    }

    /// Number of values currently interned.
    pub fn interned(&self) -> usize {
        self.memory.len()
    }

    fn intern(&mut self, value: &Value) -> Result<String, SerializeError> {
        if exceeds_depth(value, self.max_depth) {
            return Err(SerializeError::TooDeep {
                max: self.max_depth,
            });
        }

        let key = serde_json::to_string(value)?;
        if let Some(id) = self.ids.get(&key) {
            return Ok(id.clone());
        }

        let id = self.memory.len().to_string();
        self.memory.push(value.clone());
        self.ids.insert(key, id.clone());
        Ok(id)
    }

    fn serialize_success(&mut self, outcome: &ExecutionOutcome) -> Result<String, SerializeError> {
        let result_id = self.intern(&outcome.result)?;
        let arguments_ids = outcome
            .arguments_after
            .iter()
            .map(|arg| self.intern(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let memory = self
            .memory
            .iter()
            .enumerate()
            .map(|(id, value)| (id.to_string(), value.clone()))
            .collect();

        let payload = SuccessPayload {
            status: "success",
            is_exception: outcome.is_exception,
            stdout: &outcome.stdout,
            memory,
            result_id,
            arguments_ids,
        };
        Ok(serde_json::to_string(&payload)?)
    }
}

impl ResponseSerializer for JsonResponseSerializer {
    fn serialize(&mut self, response: &ExecutionResponse) -> Result<String, SerializeError> {
        match response {
            ExecutionResponse::Success(outcome) => self.serialize_success(outcome),
            ExecutionResponse::Fail { .. } => Ok(serde_json::to_string(response)?),
        }
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.memory.clear();
    }
}

/// Whether `value` nests containers deeper than `max` levels.
fn exceeds_depth(value: &Value, max: usize) -> bool {
    let mut stack = vec![(value, 0usize)];
    while let Some((value, depth)) = stack.pop() {
        let children: Box<dyn Iterator<Item = &Value>> = match value {
            Value::Array(items) => Box::new(items.iter()),
            Value::Object(map) => Box::new(map.values()),
            _ => continue,
        };
        if depth + 1 > max {
            return true;
        }
        stack.extend(children.map(|child| (child, depth + 1)));
    }
    false
}
