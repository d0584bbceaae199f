//! Worker wire format.
//!
//! Newline-delimited JSON over the worker's stdin/stdout:
//!
//! ```text
//! worker -> core   {"ready":true}
//! core   -> worker {"seq":1,"tool_name":"create_cube","arguments":{...}}
//! worker -> core   {"seq":1,"success":"Created cube 'Cube' ..."}
//! worker -> core   {"seq":2,"failure":"ObjectNotFound","message":"..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool call sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Sequence number echoed back in the reply.
    pub seq: u64,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Any line the worker writes: a readiness report or a call reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkerMessage {
    /// The startup handshake.
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    pub fn success(seq: u64, value: Value) -> Self {
        Self {
            seq: Some(seq),
            success: Some(value),
            ..Default::default()
        }
    }

    pub fn failure(seq: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seq: Some(seq),
            failure: Some(code.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Interpret a reply. A `failure` code wins over any `success` value.
    pub fn into_outcome(self) -> WorkerOutcome {
        match self.failure {
            Some(code) => WorkerOutcome::Failure {
                code,
                message: self.message.unwrap_or_default(),
            },
            None => WorkerOutcome::Success(self.success.unwrap_or(Value::Null)),
        }
    }
}

/// Result of a tool call as reported by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Success(Value),
    Failure { code: String, message: String },
}
