//! JSON-RPC 2.0 message parsing and formatting for the wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Maximum accepted message size in bytes. Messages at or above this size
/// are rejected before any decoding is attempted.
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// A request id. JSON-RPC 2.0 allows integers and strings; everything else
/// is an invalid request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
}

/// JSON-RPC error carrying the code to put on the wire.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Parse one framed JSON-RPC message.
pub fn parse_message(raw: &str) -> Result<Message, JsonRpcError> {
    if raw.len() >= MAX_MESSAGE_SIZE {
        return Err(JsonRpcError::new(
            PARSE_ERROR,
            format!(
                "Message too large: {} bytes exceeds {} limit",
                raw.len(),
                MAX_MESSAGE_SIZE
            ),
        ));
    }

    let data: Value = serde_json::from_str(raw)
        .map_err(|e| JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)))?;

    let Value::Object(obj) = data else {
        return Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: message must be an object",
        ));
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: jsonrpc must be '2.0'",
        ));
    }

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => {
            return Err(JsonRpcError::new(
                INVALID_REQUEST,
                "Invalid Request: method must be a string",
            ));
        }
    };

    let params = match obj.get("params") {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            return Err(JsonRpcError::new(
                INVALID_REQUEST,
                "Invalid Request: params must be an object",
            ));
        }
    };

    match obj.get("id") {
        None => Ok(Message::Notification(Notification { method, params })),
        Some(Value::String(s)) => Ok(Message::Request(Request {
            id: RequestId::String(s.clone()),
            method,
            params,
        })),
        Some(Value::Number(n)) if n.is_i64() => Ok(Message::Request(Request {
            id: RequestId::Number(n.as_i64().unwrap_or_default()),
            method,
            params,
        })),
        Some(_) => Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: id must be integer or string",
        )),
    }
}

/// Format a successful response.
pub fn format_response(id: &RequestId, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
    .to_string()
}

/// Format an error response. `id` is `None` when the request id was never
/// learned (parse errors), which serializes as JSON `null`.
pub fn format_error(id: Option<&RequestId>, code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
    .to_string()
}
