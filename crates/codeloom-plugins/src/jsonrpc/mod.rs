//! JSON-RPC 2.0 message types.
//!
//! Only integer correlation ids are used. Request ids are allocated per
//! connection by [`IdAllocator`].

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The requested method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The params were missing or malformed.
pub const INVALID_PARAMS: i64 = -32602;
/// The handler failed unexpectedly.
pub const INTERNAL_ERROR: i64 = -32603;
/// The request was cancelled or its session already settled.
pub const REQUEST_CANCELLED: i64 = -32800;
/// No input source could resolve the requested URI.
pub const SOURCE_UNAVAILABLE: i64 = -32001;
/// An input source recognised the URI but failed to read it.
pub const SOURCE_READ_ERROR: i64 = -32002;

/// Monotonic request id generator, one per connection.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl IdAllocator {
    /// Creates an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error object.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Returns the message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Returns the structured data, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// Outcome carried by a response.
pub type Reply = Result<Value, JsonRpcError>;

/// One decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// A call expecting a response.
    Request {
        /// Correlation id.
        id: i64,
        /// Method name.
        method: String,
        /// Parameters, `Null` when absent.
        params: Value,
    },
    /// A one-way message.
    Notification {
        /// Method name.
        method: String,
        /// Parameters, `Null` when absent.
        params: Value,
    },
    /// The answer to an earlier request.
    Response {
        /// Correlation id of the request.
        id: i64,
        /// Result or error.
        reply: Reply,
    },
}

impl JsonRpcMessage {
    /// Decodes a frame body.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation when the body is not a JSON
    /// object, lacks a method and an id, or uses a non-integer id.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|error| format!("invalid JSON: {error}"))?;
        let Value::Object(mut object) = value else {
            return Err(String::from("message is not a JSON object"));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::Number(number)) => Some(
                number
                    .as_i64()
                    .ok_or_else(|| format!("unsupported id {number}"))?,
            ),
            Some(other) => return Err(format!("unsupported id {other}")),
        };
        let params = object.remove("params").unwrap_or(Value::Null);

        match (object.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => Ok(Self::Request { id, method, params }),
            (Some(Value::String(method)), None) => Ok(Self::Notification { method, params }),
            (Some(other), _) => Err(format!("method is not a string: {other}")),
            (None, Some(id)) => Ok(Self::Response {
                id,
                reply: Self::reply_from(&mut object)?,
            }),
            (None, None) => Err(String::from("message has neither method nor id")),
        }
    }

    fn reply_from(object: &mut Map<String, Value>) -> Result<Reply, String> {
        match object.remove("error") {
            Some(error) if !error.is_null() => serde_json::from_value(error)
                .map(Err)
                .map_err(|problem| format!("malformed error object: {problem}")),
            _ => Ok(Ok(object.remove("result").unwrap_or(Value::Null))),
        }
    }

    /// Encodes the message as a frame body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only arises for non-string map
    /// keys inside user-provided values.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let value = match self {
            Self::Request { id, method, params } => {
                json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
            }
            Self::Notification { method, params } => {
                json!({"jsonrpc": "2.0", "method": method, "params": params})
            }
            Self::Response { id, reply: Ok(result) } => {
                json!({"jsonrpc": "2.0", "id": id, "result": result})
            }
            Self::Response { id, reply: Err(error) } => {
                json!({"jsonrpc": "2.0", "id": id, "error": error})
            }
        };
        serde_json::to_vec(&value)
    }
}
