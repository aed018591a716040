//! JSON-RPC 2.0 envelopes exchanged between frames

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request ID (can be string, number, or null)
///
/// Numbers keep their JSON representation so an id is echoed back exactly as
/// it was received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
    Null,
}

impl RequestId {
    /// Accept only the id shapes JSON-RPC allows: string, number or null.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id.into())
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RequestId,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 Notification (no id field)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Response
///
/// `result: Some(Value::Null)` is a defined result and serializes as
/// `"result": null`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

impl Response {
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let id = map.get("id").and_then(RequestId::from_value)?;
        let error = map
            .get("error")
            .filter(|error| !error.is_null())
            .cloned()
            .map(JsonRpcError::from_reply);

        Some(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: map.get("result").cloned(),
            error,
            id,
        })
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const INVALID_REQUEST: i32 = -32600;

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::application_error(Self::INVALID_REQUEST, message)
    }

    pub fn application_error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build an error from whatever a peer put in a reply's `error` field.
    ///
    /// Peers are not required to send a well-formed error object, so anything
    /// that does not deserialize is kept verbatim in `data`.
    pub fn from_reply(value: Value) -> Self {
        if let Ok(error) = serde_json::from_value::<JsonRpcError>(value.clone()) {
            return error;
        }

        let message = match &value {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            other => other.to_string(),
        };

        Self {
            code: 0,
            message,
            data: Some(value),
        }
    }
}

/// Method name and parameters of an incoming request or notification,
/// exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Option<String>,
    pub params: Option<Value>,
}

impl Call {
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Positional arguments for the handler. Missing or null params mean no
    /// arguments; anything other than an array is rejected.
    pub fn params(&self) -> Result<Vec<Value>, JsonRpcError> {
        match &self.params {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(values)) => Ok(values.clone()),
            Some(_) => Err(JsonRpcError::invalid_request("request params invalid")),
        }
    }
}

/// Classification of an arbitrary payload seen on the message bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Carries an `id` key. The id itself is not validated yet.
    Request { id: Value, call: Call },
    Notification(Call),
    Response(Response),
    Unrecognized,
}

impl Message {
    pub fn classify(data: &Value) -> Self {
        let Some(map) = data.as_object() else {
            return Self::Unrecognized;
        };

        if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Self::Unrecognized;
        }

        // Someone else's reply passing through the same channel. A null
        // `error` counts as absent, as it does for the caller's own replies.
        let has_error = map.get("error").is_some_and(|error| !error.is_null());
        if map.contains_key("result") || has_error {
            return match Response::from_map(map) {
                Some(response) => Self::Response(response),
                None => Self::Unrecognized,
            };
        }

        let call = Call {
            method: map.get("method").and_then(Value::as_str).map(str::to_string),
            params: map.get("params").cloned(),
        };

        match map.get("id") {
            Some(id) => Self::Request {
                id: id.clone(),
                call,
            },
            None => Self::Notification(call),
        }
    }
}
