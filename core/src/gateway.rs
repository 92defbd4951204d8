//! The gateway: dispatcher, reply demultiplexer, and terminator.
//!
//! [`Gateway`] ties the correlation machinery together. It owns the single
//! mutex over the shared state (id allocator, pending-request table,
//! resolver intercept registry), the broker transport, and the clock.
//!
//! Three flows meet here:
//!
//! 1. **Dispatch** - [`Gateway::send_request`] binds an id to a pending
//!    record and publishes the request. Insertion strictly precedes publish
//!    so a fast reply can never beat its own record into the table.
//! 2. **Demultiplex** - the consumer task decodes each inbox frame and
//!    routes it to exactly one of: the resolver (intercepted id), the
//!    pending record's completion path, or drop-with-warning.
//! 3. **Terminate** - a periodic sweep fails out records older than the
//!    deadline with HTTP 504 and releases their ids.

use crate::clock::Clock;
use crate::id::{IdAllocator, RequestId};
use crate::message::{Reply, RequestMessage};
use crate::resolver::ResolverRegistry;
use crate::responder::{GatewayResponse, Responder};
use crate::routing::RoutingKey;
use crate::table::{Completion, PendingRequest, RequestTable, Validator};
use crate::transport::{BrokerTransport, TransportError};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Tunables for the correlation engine.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a pending request may wait for its reply.
    pub reply_deadline: Duration,
    /// Cadence of the terminator's sweep.
    pub sweep_interval: Duration,
    /// Maximum entity-resolution depth before the resolver gives up.
    pub max_resolution_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reply_deadline: Duration::from_millis(15_000),
            sweep_interval: Duration::from_millis(2_000),
            max_resolution_depth: 2,
        }
    }
}

/// Shared mutable state, guarded by one coarse mutex.
///
/// The spec's invariants live here: every table id is allocated, an id is
/// in at most one of {table, intercepts}, and both reply delivery and the
/// sweep go through this lock so they can never both claim one record.
pub(crate) struct CoreState {
    pub(crate) ids: IdAllocator,
    pub(crate) table: RequestTable,
    pub(crate) intercepts: HashMap<RequestId, oneshot::Sender<Reply>>,
}

struct Inner {
    state: Mutex<CoreState>,
    transport: Arc<dyn BrokerTransport>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    resolver: ResolverRegistry,
}

/// The request-correlation engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Build a gateway over the given transport, clock, and resolver
    /// registry.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
        resolver: ResolverRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CoreState {
                    ids: IdAllocator::new(),
                    table: RequestTable::new(),
                    intercepts: HashMap::new(),
                }),
                transport,
                clock,
                config,
                resolver,
            }),
        }
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub(crate) fn state(&self) -> MutexGuard<'_, CoreState> {
        self.inner.state.lock().unwrap()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn BrokerTransport> {
        &self.inner.transport
    }

    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &ResolverRegistry {
        &self.inner.resolver
    }

    /// Current time per the injected clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }

    /// Allocate a fresh request id.
    ///
    /// The id stays outstanding until the request it is bound to completes
    /// or times out.
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        self.state().ids.allocate()
    }

    /// Dispatch a request: record the pending entry, then publish.
    ///
    /// `message.msg_id` must come from [`Gateway::next_id`] and must not
    /// already be pending; a duplicate is logged and nothing is published.
    ///
    /// Returns whether the transport accepted the frame. A rejected publish
    /// is deliberately NOT surfaced to the caller as an error: the pending
    /// record stays in the table and the terminator fails it at the
    /// deadline, so transport hiccups and silent services look identical to
    /// the client.
    pub async fn send_request(
        &self,
        key: &RoutingKey,
        message: RequestMessage,
        responder: Responder,
        completion: Completion,
        validator: Option<Validator>,
    ) -> bool {
        let uid = message.msg_id;
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                error!(msg_id = %uid, error = %err, "request message failed to serialize");
                self.state().ids.release(uid);
                return false;
            }
        };

        {
            let mut state = self.state();
            debug_assert!(state.ids.is_allocated(uid), "msg_id must come from the allocator");
            let record = PendingRequest {
                uid,
                responder,
                completion,
                issued_at: self.inner.clock.now(),
                validator,
            };
            if let Err(err) = state.table.insert(record) {
                warn!(msg_id = %uid, error = %err, "dropping dispatch with duplicate id");
                return false;
            }
        }

        match self.inner.transport.publish(key, payload).await {
            Ok(()) => {
                debug!(msg_id = %uid, key = %key, "request published");
                true
            }
            Err(err) => {
                warn!(
                    msg_id = %uid,
                    key = %key,
                    error = %err,
                    "publish rejected; pending request will expire via the sweep"
                );
                false
            }
        }
    }

    /// Start the reply consumer and the terminator.
    ///
    /// Consumes the transport's inbox stream on one task and sweeps expired
    /// records on another. Both tasks run for the life of the process (the
    /// consumer exits if the broker stream ends).
    ///
    /// # Errors
    ///
    /// Returns the transport error if the inbox consumer cannot be
    /// established; this is fatal at startup.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut frames = self.inner.transport.consume().await?;

        let demux = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                demux.handle_frame(&frame);
            }
            info!("inbox stream ended; reply consumer exiting");
        });

        let sweeper = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.inner.config.sweep_interval);
            loop {
                ticker.tick().await;
                sweeper.sweep_expired();
            }
        });

        Ok(())
    }

    /// Route one inbound frame.
    ///
    /// Every reply ends up in exactly one place: the resolver (intercepted
    /// id), the pending record's completion path, or the floor with a
    /// warning.
    pub fn handle_frame(&self, frame: &[u8]) {
        let reply = match Reply::parse(frame) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "dropping malformed reply frame");
                return;
            }
        };
        let uid = reply.msg_id;
        let status = reply.status;

        enum Route {
            Intercepted(oneshot::Sender<Reply>),
            Pending(PendingRequest),
            Unknown,
        }

        let route = {
            let mut state = self.state();
            if let Some(tx) = state.intercepts.remove(&uid) {
                state.ids.release(uid);
                Route::Intercepted(tx)
            } else if let Some(record) = state.table.take(uid) {
                Route::Pending(record)
            } else {
                Route::Unknown
            }
        };

        match route {
            Route::Intercepted(tx) => {
                debug!(msg_id = %uid, status, "reply intercepted by resolver");
                if tx.send(reply).is_err() {
                    debug!(msg_id = %uid, "resolver abandoned its intercepted reply");
                }
            }
            Route::Pending(record) => self.complete(record, reply, status),
            Route::Unknown => {
                warn!(
                    msg_id = %uid,
                    status,
                    "dropping reply with no pending request (possibly timed out)"
                );
            }
        }
    }

    /// Run the validator (if any) and fire the completion.
    ///
    /// Validator rejection deliberately writes no substitute response: the
    /// record goes back into the table with its original timestamp so the
    /// terminator fails it with 504 at the deadline, and the client learns
    /// about the bad reply as a timeout.
    fn complete(&self, record: PendingRequest, reply: Reply, status: i64) {
        if let Some(validate) = &record.validator {
            match validate(&reply) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        msg_id = %record.uid,
                        status,
                        "reply rejected by response validator; caller will time out"
                    );
                    self.park(record);
                    return;
                }
                Err(err) => {
                    error!(
                        msg_id = %record.uid,
                        status,
                        error = %err,
                        "response validator failed; caller will time out"
                    );
                    self.park(record);
                    return;
                }
            }
        }

        let PendingRequest {
            uid,
            responder,
            completion,
            issued_at,
            ..
        } = record;
        completion(responder, issued_at, reply, status);
        self.state().ids.release(uid);
    }

    /// Put a record whose reply was rejected back into the table, keeping
    /// its issue timestamp, so the sweep terminates it at the deadline.
    ///
    /// The id is still allocated, so nothing else can have claimed it; the
    /// insert cannot collide.
    fn park(&self, record: PendingRequest) {
        let uid = record.uid;
        if let Err(err) = self.state().table.insert(record) {
            error!(msg_id = %uid, error = %err, "could not park rejected record");
        }
    }

    /// Run one terminator pass: fail out every record past the deadline
    /// with 504 and release its id.
    pub fn sweep_expired(&self) {
        let now = self.inner.clock.now();
        let deadline = chrono::Duration::from_std(self.inner.config.reply_deadline)
            .unwrap_or(chrono::Duration::MAX);

        let expired = self.state().table.sweep(now, deadline);
        if expired.is_empty() {
            return;
        }

        let mut released = Vec::with_capacity(expired.len());
        for record in expired {
            warn!(
                msg_id = %record.uid,
                issued_at = %record.issued_at,
                "no reply within deadline; failing pending request"
            );
            released.push(record.uid);
            record.responder.send(GatewayResponse::timeout());
        }

        let mut state = self.state();
        for uid in released {
            state.ids.release(uid);
        }
    }

    /// Whether the resolver currently claims this id.
    #[must_use]
    pub fn intercepting(&self, id: RequestId) -> bool {
        self.state().intercepts.contains_key(&id)
    }

    /// Number of requests currently pending in the table.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().table.len()
    }

    /// Number of ids currently outstanding (pending plus intercepted).
    #[must_use]
    pub fn outstanding_ids(&self) -> usize {
        self.state().ids.outstanding()
    }
}
