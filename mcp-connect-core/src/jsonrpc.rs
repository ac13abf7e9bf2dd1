//! Transport-agnostic JSON-RPC 2.0 message classification.
//!
//! Every message crossing the gateway is classified exactly once through
//! [`classify_jsonrpc`]. The streaming gateway uses the result both to decide
//! whether a batch needs an event stream (does it contain requests?) and to
//! correlate backend output against pending request ids, so the two paths can
//! never disagree about what a "request" or a "response" is.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request identifier.
///
/// Equality is typed: `Number(1)` and `String("1")` are different ids. Code
/// that must match ids the way a loosely typed peer would can compare the
/// `Display` form instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID (e.g., `"id": null`)
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_id(&value).map_err(|()| {
            serde::de::Error::custom("JSON-RPC ID must be string, integer, or null")
        })
    }
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "{s}"),
            JsonRpcId::Null => f.write_str("null"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// The three shapes a JSON-RPC 2.0 message can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`: expects a response.
    Request { id: JsonRpcId, method: String },
    /// Has `id`, no `method`, and a `result` or `error` member.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`: fire-and-forget.
    Notification { method: String },
}

impl JsonRpcMessageKind {
    /// Returns true for requests (the only kind that opens an event stream).
    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessageKind::Request { .. })
    }

    /// Method name for requests and notifications, `"response"` otherwise.
    pub fn method(&self) -> &str {
        match self {
            JsonRpcMessageKind::Request { method, .. } => method,
            JsonRpcMessageKind::Notification { method } => method,
            JsonRpcMessageKind::Response { .. } => "response",
        }
    }
}

/// Errors that can occur during JSON-RPC message classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonRpcClassifyError {
    /// The message is not a JSON object.
    #[error("JSON-RPC message must be an object")]
    NotAnObject,
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a string, integer, or null.
    #[error("invalid id field")]
    InvalidId,
    /// The message matches none of request, response, or notification.
    #[error("message is neither a request, a response, nor a notification")]
    Unclassifiable,
}

/// Classify a parsed JSON-RPC value without taking ownership.
///
/// A message with `id` and no `method` only counts as a response when it also
/// carries `result` or `error`; a bare `{"jsonrpc":"2.0","id":1}` is rejected.
///
/// # Errors
///
/// Returns [`JsonRpcClassifyError`] when the value is not an object, has the
/// wrong protocol version, has a malformed id, or cannot be classified.
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    let obj = value.as_object().ok_or(JsonRpcClassifyError::NotAnObject)?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = obj
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|()| JsonRpcClassifyError::InvalidId)?;
    let method = obj.get("method").and_then(Value::as_str).map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) if obj.contains_key("result") || obj.contains_key("error") => {
            Ok(JsonRpcMessageKind::Response { id })
        }
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        _ => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Parse a JSON value into a `JsonRpcId`.
///
/// Accepts string, integer, or null. Rejects floats, booleans, arrays, objects.
fn parse_id(value: &Value) -> Result<JsonRpcId, ()> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or(()),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Batches
// ─────────────────────────────────────────────────────────────────────────────

/// A classified message paired with its original JSON value.
///
/// The value is forwarded to the backend untouched; only `kind` is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcMessage {
    pub kind: JsonRpcMessageKind,
    pub value: Value,
}

impl JsonRpcMessage {
    /// Classify `value`, keeping it for forwarding.
    ///
    /// # Errors
    ///
    /// Propagates the classification failure.
    pub fn from_value(value: Value) -> Result<Self, JsonRpcClassifyError> {
        let kind = classify_jsonrpc(&value)?;
        Ok(Self { kind, value })
    }
}

/// Reasons an HTTP body is not an acceptable JSON-RPC batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Request body must include at least one JSON-RPC message")]
    Empty,
    #[error("Each JSON-RPC message must be an object")]
    NotAnObject { index: usize },
    #[error("Invalid JSON-RPC message at index {index}: {source}")]
    Invalid {
        index: usize,
        source: JsonRpcClassifyError,
    },
}

/// Parse an HTTP body into one or more classified JSON-RPC messages.
///
/// The body may be a single object or an array of objects. Batch order is
/// preserved.
///
/// # Errors
///
/// Returns [`BatchError`] for invalid JSON, an empty array, a non-object
/// element, or an element that fails classification.
pub fn parse_batch(body: &[u8]) -> Result<Vec<JsonRpcMessage>, BatchError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| BatchError::InvalidJson(e.to_string()))?;

    let values = match payload {
        Value::Array(items) => items,
        other => vec![other],
    };
    if values.is_empty() {
        return Err(BatchError::Empty);
    }

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            if !value.is_object() {
                return Err(BatchError::NotAnObject { index });
            }
            JsonRpcMessage::from_value(value).map_err(|source| BatchError::Invalid { index, source })
        })
        .collect()
}

/// Returns true if any message in the batch is a request.
pub fn contains_requests(messages: &[JsonRpcMessage]) -> bool {
    messages.iter().any(|m| m.kind.is_request())
}
