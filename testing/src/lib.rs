//! # Switchboard Testing
//!
//! Testing utilities for the switchboard gateway:
//!
//! - [`MockClock`]: a deterministic, advanceable clock so timeout behavior
//!   can be tested without sleeping;
//! - [`InMemoryBroker`]: a [`BrokerTransport`] double that records every
//!   publish, lets tests inject inbox frames, and can run scripted
//!   microservices that answer matching routing keys automatically;
//! - [`reply_frame`]: a helper for building well-formed reply payloads.
//!
//! # Example
//!
//! ```ignore
//! let broker = Arc::new(InMemoryBroker::new());
//! let clock = MockClock::default();
//! let gateway = Gateway::new(broker.clone(), Arc::new(clock.clone()),
//!     GatewayConfig::default(), ResolverRegistry::new());
//! gateway.start().await?;
//!
//! // ... dispatch a request, then answer it:
//! let msg = broker.published()[0].clone();
//! broker.inject_frame(reply_frame(msg.msg_id(), 0, json!([])));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use switchboard_core::{BrokerTransport, Clock, FrameStream, RoutingKey, TransportError};
use tokio::sync::mpsc;
use tracing::debug;

/// Deterministic clock for tests.
///
/// Starts at a fixed instant (2025-01-01T00:00:00Z) and only moves when the
/// test advances it, so sweep deadlines can be crossed precisely.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::starting_at(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        )
    }
}

impl MockClock {
    /// A clock pinned to the given instant.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn guard(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap()
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.guard();
        *now += Duration::milliseconds(ms);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.guard()
    }
}

/// A recorded publish: routing key plus decoded payload.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    /// The routing key the frame was published under.
    pub key: String,
    /// The decoded JSON payload.
    pub payload: Value,
}

impl PublishedFrame {
    /// The `msg_id` carried by the payload, if any.
    #[must_use]
    pub fn msg_id(&self) -> Option<u64> {
        self.payload.get("msg_id").and_then(Value::as_u64)
    }
}

type ScriptFn = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct BrokerState {
    published: Vec<PublishedFrame>,
    scripts: Vec<(String, ScriptFn)>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    reject_publishes: bool,
}

/// In-memory [`BrokerTransport`] double.
///
/// Publishes are recorded and matched against registered scripts; script
/// replies are fed straight back into the inbox, closing the loop the way a
/// real microservice would.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// A broker with an empty publish log and no scripts.
    #[must_use]
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(BrokerState {
                published: Vec::new(),
                scripts: Vec::new(),
                inbox_rx: Some(inbox_rx),
                reject_publishes: false,
            }),
            inbox_tx,
        }
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn guard(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    /// Everything published so far.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedFrame> {
        self.guard().published.clone()
    }

    /// Publishes whose routing key equals `key`.
    #[must_use]
    pub fn published_to(&self, key: &str) -> Vec<PublishedFrame> {
        self.guard()
            .published
            .iter()
            .filter(|f| f.key == key)
            .cloned()
            .collect()
    }

    /// Make every subsequent publish fail, as a dropped broker channel
    /// would.
    pub fn reject_publishes(&self, reject: bool) {
        self.guard().reject_publishes = reject;
    }

    /// Push a raw frame into the inbox, as if a microservice had replied.
    pub fn inject_frame(&self, frame: Vec<u8>) {
        // The receiver lives until the broker is dropped, so this only
        // fails after teardown.
        let _ = self.inbox_tx.send(frame);
    }

    /// Register a scripted microservice for one routing key.
    ///
    /// When a frame is published to `key`, the script sees the decoded
    /// payload; returning `Some(reply)` injects that reply into the inbox.
    /// Returning `None` stays silent, like a service that never answers.
    pub fn script(&self, key: impl Into<String>, respond: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) {
        self.guard().scripts.push((key.into(), Box::new(respond)));
    }
}

impl BrokerTransport for InMemoryBroker {
    fn publish(
        &self,
        key: &RoutingKey,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let reply = {
                let mut state = self.guard();
                if state.reject_publishes {
                    return Err(TransportError::PublishFailed {
                        key,
                        reason: "broker rejecting publishes".into(),
                    });
                }
                let payload: Value = serde_json::from_slice(&payload).map_err(|e| {
                    TransportError::PublishFailed {
                        key: key.clone(),
                        reason: format!("payload is not JSON: {e}"),
                    }
                })?;
                state.published.push(PublishedFrame {
                    key: key.clone(),
                    payload: payload.clone(),
                });
                state
                    .scripts
                    .iter()
                    .find(|(k, _)| *k == key)
                    .and_then(|(_, respond)| respond(&payload))
            };
            if let Some(reply) = reply {
                debug!(key = %key, "scripted service replying");
                self.inject_frame(serde_json::to_vec(&reply).unwrap_or_default());
            }
            Ok(())
        })
    }

    fn consume(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<FrameStream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self
                .guard()
                .inbox_rx
                .take()
                .ok_or_else(|| TransportError::ConsumeFailed("inbox already consumed".into()))?;
            let stream = async_stream::stream! {
                while let Some(frame) = rx.recv().await {
                    yield frame;
                }
            };
            Ok(Box::pin(stream) as FrameStream)
        })
    }
}

/// Build a well-formed reply frame.
#[must_use]
pub fn reply_frame(msg_id: u64, status: i64, result: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "msg_id": msg_id,
        "status": status,
        "result": result,
    }))
    .unwrap_or_default()
}

/// Build a scripted echo service: answers every request with status 0 and
/// the given result payload, echoing the request's `msg_id`.
#[must_use]
pub fn echo_service(result: Value) -> impl Fn(&Value) -> Option<Value> + Send + Sync + 'static {
    move |request: &Value| {
        let msg_id = request.get("msg_id")?.as_u64()?;
        Some(json!({
            "msg_id": msg_id,
            "status": 0,
            "result": result.clone(),
        }))
    }
}
