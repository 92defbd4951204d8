//! Broker transport abstraction.
//!
//! The gateway owns exactly two broker channels: a publish channel bound to
//! the topic request exchange and a consume channel bound, via an exclusive
//! inbox queue, to the direct gateway exchange. This module abstracts both
//! behind the [`BrokerTransport`] trait so the correlation engine can run
//! against the real AMQP transport in production and an in-memory double in
//! tests.
//!
//! # Dyn compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so the gateway can hold an `Arc<dyn BrokerTransport>`.

use crate::routing::RoutingKey;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by a broker transport.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// Could not establish the connection or its channels.
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    /// The publish channel did not accept the frame.
    #[error("publish to '{key}' failed: {reason}")]
    PublishFailed {
        /// Routing key of the rejected publish.
        key: String,
        /// Broker-side reason.
        reason: String,
    },

    /// The inbox consumer could not be established.
    #[error("consume setup failed: {0}")]
    ConsumeFailed(String),
}

/// Stream of raw inbound frame payloads from the inbox queue.
pub type FrameStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// The two-channel broker seam.
///
/// Implementations must be `Send + Sync`; the gateway shares one transport
/// across the dispatcher, the resolver, and the consumer task.
pub trait BrokerTransport: Send + Sync {
    /// Publish a frame to the request exchange under the given routing key.
    ///
    /// Resolves to `Ok(())` when the channel accepted the frame. The
    /// dispatcher treats a rejection as a local no-op: the pending record
    /// stays in the table and expires through the sweep.
    fn publish(
        &self,
        key: &RoutingKey,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Begin consuming the inbox and return the stream of frame payloads.
    ///
    /// Deliveries without a payload are logged and skipped inside the
    /// implementation; the stream only yields non-empty frames. The inbox
    /// is consumed with auto-ack, so a frame lost in flight is
    /// indistinguishable from a slow reply, which the timeout path assumes.
    fn consume(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<FrameStream, TransportError>> + Send + '_>>;
}
