//! JSON frames exchanged on the live connection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::workflow::WorkflowEvent;

pub const CODE_OK: u16 = 200;
pub const CODE_BAD_REQUEST: u16 = 400;

/// A command sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub request_id: String,
    pub command: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl Request {
    /// A non-empty parameter as text. Numbers and booleans are stringified.
    pub fn param(&self, name: &str) -> Option<String> {
        let text = match self.params.get(name)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn require(&self, name: &str) -> Result<String> {
        self.param(name)
            .ok_or_else(|| Error::InvalidInput(format!("missing parameter: {}", name)))
    }
}

/// Reply to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub request_id: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            code: CODE_OK,
            message: None,
            data,
        }
    }

    pub fn error(request_id: impl Into<String>, err: &Error) -> Self {
        Self {
            request_id: request_id.into(),
            code: err.status_code(),
            message: Some(err.to_string()),
            data: None,
        }
    }

    pub fn bad_request(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            code: CODE_BAD_REQUEST,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Everything the server writes to a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Response(Response),
    Event(WorkflowEvent),
}

/// Parse one text frame. On failure, returns the response to send instead.
pub fn parse_request(text: &str) -> std::result::Result<Request, Response> {
    serde_json::from_str::<Request>(text).map_err(|e| {
        // Echo the request id back when the frame is at least a JSON object.
        let request_id = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("request_id").and_then(Value::as_str).map(String::from))
            .unwrap_or_default();
        Response::bad_request(request_id, format!("invalid request: {}", e))
    })
}
