//! HTTP error bridging.
//!
//! Client-side validation failures become 400 responses wearing the same
//! envelope every other response wears, and the core's [`GatewayResponse`]
//! is converted into an axum response here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use switchboard_core::{Envelope, ErrorCode, GatewayResponse};

use crate::entity::FieldKind;

/// A request rejected before any broker traffic.
#[derive(Debug, Clone)]
pub struct BadRequest {
    /// Machine-readable failure code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl BadRequest {
    /// A required field was absent from the request body.
    #[must_use]
    pub fn missing(field: &str) -> Self {
        Self {
            code: ErrorCode::BadRequestMissingParam,
            message: format!("required field '{field}' is missing"),
        }
    }

    /// A field value had the wrong type or could not be coerced.
    #[must_use]
    pub fn invalid(field: &str, expected: FieldKind) -> Self {
        Self {
            code: ErrorCode::BadRequestInvalidParam,
            message: format!("field '{field}' must be a {expected}"),
        }
    }

    /// The request body was not a JSON object.
    #[must_use]
    pub fn not_an_object() -> Self {
        Self {
            code: ErrorCode::BadRequestInvalidParam,
            message: "request body must be a JSON object".to_owned(),
        }
    }
}

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(Envelope::fail(self.code, self.message)),
        )
            .into_response()
    }
}

/// Convert the core's response into an axum response.
pub(crate) fn gateway_response(response: GatewayResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

/// The response used when the gateway dropped a request internally (the
/// responder was discarded without ever being sent).
pub(crate) fn gateway_dropped() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Envelope::fail(
            ErrorCode::InternalError,
            "the gateway dropped the request",
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_carries_code_and_name() {
        let rejection = BadRequest::missing("manufacturer");
        assert_eq!(rejection.code, ErrorCode::BadRequestMissingParam);
        assert!(rejection.message.contains("manufacturer"));
    }

    #[test]
    fn invalid_field_names_expected_kind() {
        let rejection = BadRequest::invalid("quantity", FieldKind::Number);
        assert_eq!(rejection.code, ErrorCode::BadRequestInvalidParam);
        assert!(rejection.message.contains("number"));
    }
}
