//! Responder handles and the broker-status → HTTP mapping.
//!
//! A [`Responder`] is the core's view of one waiting HTTP client. It is a
//! single-shot handle: sending consumes it, so a pending record can answer
//! its client at most once no matter how the request terminates.

use crate::envelope::{Envelope, ErrorCode};
use crate::message::Reply;
use crate::table::Completion;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// A fully-determined HTTP response: status code plus envelope body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status: u16,
    /// Envelope body.
    pub body: Envelope,
}

impl GatewayResponse {
    /// A 200 success carrying the given payload.
    #[must_use]
    pub const fn ok(result: Value) -> Self {
        Self {
            status: 200,
            body: Envelope::ok(result),
        }
    }

    /// A failure with the given HTTP status.
    #[must_use]
    pub fn fail(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope::fail(code, message),
        }
    }

    /// The 504 emitted by the terminator when a request exceeds its deadline.
    #[must_use]
    pub fn timeout() -> Self {
        Self::fail(
            504,
            ErrorCode::ServiceTimeout,
            "upstream service did not reply in time",
        )
    }

    /// Map a broker reply onto the HTTP surface.
    ///
    /// - status `0` → 200 with the reply payload;
    /// - status `404` → 404 `NOT_FOUND`;
    /// - other 400-class → 400 `BAD_REQUEST`;
    /// - anything else non-zero → 500 `INTERNAL_ERROR`.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        match reply.status {
            0 => Self::ok(reply.result().cloned().unwrap_or(Value::Null)),
            404 => Self::fail(
                404,
                ErrorCode::NotFound,
                reply.error_message().unwrap_or("entity not found"),
            ),
            status @ 400..=499 => {
                let fallback = format!("upstream rejected the request (status {status})");
                Self::fail(
                    400,
                    ErrorCode::BadRequest,
                    reply.error_message().unwrap_or(&fallback),
                )
            }
            status => {
                let fallback = format!("upstream failure (status {status})");
                Self::fail(
                    500,
                    ErrorCode::InternalError,
                    reply.error_message().unwrap_or(&fallback),
                )
            }
        }
    }
}

/// Single-shot handle to a waiting HTTP client.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<GatewayResponse>,
}

impl Responder {
    /// Create a responder and the receiver the HTTP handler awaits.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<GatewayResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the response, consuming the handle.
    ///
    /// A client that already disconnected is not an error; the response is
    /// quietly discarded.
    pub fn send(self, response: GatewayResponse) {
        if self.tx.send(response).is_err() {
            debug!("client disconnected before the response was ready");
        }
    }
}

/// The standard completion callback: map the reply through
/// [`GatewayResponse::from_reply`] and answer the client.
///
/// Adapters that need enrichment wrap this with the resolver's
/// `resolve_one`/`resolve_list` constructors instead of replacing it.
#[must_use]
pub fn default_completion() -> Completion {
    Box::new(|responder, _issued_at, reply, _status| {
        responder.send(GatewayResponse::from_reply(&reply));
    })
}
