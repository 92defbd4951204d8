//! Wire message types.
//!
//! Everything crossing the broker is a self-describing UTF-8 JSON object.
//! Outgoing requests always carry `msg_id`, `msg_intention`, `status`
//! (initially 0) and `userID`, plus whatever entity-specific fields the
//! adapter attached. Incoming replies must carry a numeric `msg_id` and a
//! numeric `status`; anything else is malformed and is dropped upstream.

use crate::id::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// What the request asks the owning microservice to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intention {
    /// Fetch one or more entities.
    Read,
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update,
    /// Delete an entity.
    Delete,
}

impl fmt::Display for Intention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// An outgoing request message.
///
/// Serializes to the keyed wire structure the microservices expect:
///
/// ```json
/// {"msg_id": 7, "msg_intention": "READ", "status": 0, "userID": "u1", "id": "abc"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Correlation id, echoed back by the reply.
    pub msg_id: RequestId,
    /// Requested operation.
    pub msg_intention: Intention,
    /// Always 0 on the request path; replies carry the outcome here.
    pub status: i64,
    /// Caller identity, propagated verbatim.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Entity-specific fields, flattened into the top-level object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RequestMessage {
    /// Build a request with no entity fields yet.
    #[must_use]
    pub fn new(msg_id: RequestId, msg_intention: Intention, user_id: impl Into<String>) -> Self {
        Self {
            msg_id,
            msg_intention,
            status: 0,
            user_id: user_id.into(),
            fields: Map::new(),
        }
    }

    /// Attach one entity field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Attach a set of entity fields.
    #[must_use]
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// The UTF-8 JSON wire encoding.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error; with JSON-safe field
    /// values this does not happen in practice.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Why an inbound frame was rejected as malformed.
#[derive(Debug, Error)]
pub enum ReplyParseError {
    /// The payload was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    /// The payload was JSON but not an object.
    #[error("frame is not a JSON object")]
    NotObject,

    /// `msg_id` was absent or not an integer in the 53-bit safe range.
    #[error("frame has no usable numeric msg_id")]
    BadMsgId,

    /// `status` was absent or not numeric.
    #[error("frame has no numeric status")]
    BadStatus,
}

/// A decoded reply message.
///
/// `body` retains the full reply object so the resolver can substitute
/// inflated entities in place and completion callbacks can read
/// entity-specific fields.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Correlation id echoed from the request.
    pub msg_id: RequestId,
    /// Outcome status; 0 is success.
    pub status: i64,
    /// The full reply object.
    pub body: Map<String, Value>,
}

impl Reply {
    /// Decode a raw frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyParseError`] when the frame is not an object or lacks
    /// the required numeric `msg_id`/`status` fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, ReplyParseError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same contract as [`Reply::parse`].
    pub fn from_value(value: Value) -> Result<Self, ReplyParseError> {
        let Value::Object(body) = value else {
            return Err(ReplyParseError::NotObject);
        };
        let msg_id = body
            .get("msg_id")
            .and_then(Value::as_u64)
            .and_then(RequestId::from_wire)
            .ok_or(ReplyParseError::BadMsgId)?;
        let status = body
            .get("status")
            .and_then(Value::as_i64)
            .ok_or(ReplyParseError::BadStatus)?;
        Ok(Self {
            msg_id,
            status,
            body,
        })
    }

    /// Synthesize a failure reply, used when enrichment fails terminally.
    #[must_use]
    pub fn failure(msg_id: RequestId, status: i64, message: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("msg_id".into(), Value::from(msg_id.value()));
        body.insert("status".into(), Value::from(status));
        let mut error = Map::new();
        error.insert("message".into(), Value::String(message.into()));
        body.insert("error".into(), Value::Object(error));
        Self {
            msg_id,
            status,
            body,
        }
    }

    /// The reply payload, if present.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.body.get("result")
    }

    /// Take the reply payload, substituting JSON `null` when absent.
    #[must_use]
    pub fn into_result(mut self) -> Value {
        self.body.remove("result").unwrap_or(Value::Null)
    }

    /// A human-readable error message, when the reply carries one.
    ///
    /// Looks for `error.message` first, then a top-level `message`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| self.body.get("message"))
            .and_then(Value::as_str)
    }
}
