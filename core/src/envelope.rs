//! The HTTP response envelope.
//!
//! Every HTTP response the gateway emits has one of two shapes:
//!
//! ```json
//! {"status": "OK", "result": ...}
//! {"status": "FAIL", "error": {"message": "...", "code": "..."}}
//! ```
//!
//! The envelope lives in the core (rather than the web crate) because the
//! terminator writes timeout failures directly and completion callbacks map
//! broker statuses into it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable failure codes carried in the failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Upstream rejected the request (400-class broker status).
    BadRequest,
    /// A required request field was absent.
    BadRequestMissingParam,
    /// A request field had the wrong type or an unparsable value.
    BadRequestInvalidParam,
    /// The entity does not exist.
    NotFound,
    /// No reply arrived within the gateway deadline.
    ServiceTimeout,
    /// Upstream failure or gateway-side resolution failure.
    InternalError,
}

/// The `error` object of a failure envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description.
    pub message: String,
    /// Machine-readable code.
    pub code: ErrorCode,
}

/// The uniform response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Envelope {
    /// Success, HTTP 200.
    #[serde(rename = "OK")]
    Ok {
        /// The reply payload: a result list, a single entity, or null.
        result: Value,
    },
    /// Failure, non-2xx.
    #[serde(rename = "FAIL")]
    Fail {
        /// Failure details.
        error: ErrorBody,
    },
}

impl Envelope {
    /// A success envelope.
    #[must_use]
    pub const fn ok(result: Value) -> Self {
        Self::Ok { result }
    }

    /// A failure envelope.
    #[must_use]
    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Fail {
            error: ErrorBody {
                message: message.into(),
                code,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_shape() {
        let value = serde_json::to_value(Envelope::ok(json!([]))).unwrap();
        assert_eq!(value, json!({"status": "OK", "result": []}));
    }

    #[test]
    fn fail_envelope_shape() {
        let value =
            serde_json::to_value(Envelope::fail(ErrorCode::ServiceTimeout, "too slow")).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "FAIL",
                "error": {"message": "too slow", "code": "SERVICE_TIMEOUT"}
            })
        );
    }

    #[test]
    fn error_codes_use_wire_names() {
        for (code, name) in [
            (ErrorCode::BadRequest, "\"BAD_REQUEST\""),
            (ErrorCode::BadRequestMissingParam, "\"BAD_REQUEST_MISSING_PARAM\""),
            (ErrorCode::BadRequestInvalidParam, "\"BAD_REQUEST_INVALID_PARAM\""),
            (ErrorCode::NotFound, "\"NOT_FOUND\""),
            (ErrorCode::ServiceTimeout, "\"SERVICE_TIMEOUT\""),
            (ErrorCode::InternalError, "\"INTERNAL_ERROR\""),
        ] {
            assert_eq!(serde_json::to_string(&code).unwrap(), name);
        }
    }
}
