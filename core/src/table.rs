//! The pending-request table.
//!
//! One record per in-flight broker round-trip, keyed by request id. Records
//! are created by the dispatcher immediately before publish and destroyed by
//! exactly one of: reply delivery, the terminator's sweep, or resolver
//! enrichment finishing.

use crate::id::RequestId;
use crate::message::Reply;
use crate::responder::Responder;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Completion callback fired when a reply (possibly enriched) arrives.
///
/// Arguments are the responder handle, the record's issue timestamp, the
/// decoded reply, and the broker status. `FnOnce` makes the at-most-once
/// firing guarantee structural.
pub type Completion = Box<dyn FnOnce(Responder, DateTime<Utc>, Reply, i64) + Send + 'static>;

/// Optional response-schema check evaluated before the completion fires.
pub type Validator = Box<dyn Fn(&Reply) -> Result<bool, ValidationError> + Send + 'static>;

/// Raised by a validator that could not evaluate the reply at all.
#[derive(Debug, Error)]
#[error("response validation failed: {0}")]
pub struct ValidationError(pub String);

/// A pending request awaiting its reply.
pub struct PendingRequest {
    /// The request id this record is keyed by.
    pub uid: RequestId,
    /// Handle to the waiting HTTP client.
    pub responder: Responder,
    /// Fired when the reply is delivered.
    pub completion: Completion,
    /// When the request was dispatched.
    pub issued_at: DateTime<Utc>,
    /// Optional response-schema validator.
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("uid", &self.uid)
            .field("issued_at", &self.issued_at)
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Insert failed because the id already has a pending record.
#[derive(Debug, Error)]
#[error("request id {0} already has a pending record")]
pub struct DuplicateRequest(pub RequestId);

/// Mapping from request id to pending record.
#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl RequestTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the id has a pending record.
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert a record under its own id.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRequest`] if the id is already present; the table
    /// is left unchanged and the offered record is dropped.
    pub fn insert(&mut self, record: PendingRequest) -> Result<(), DuplicateRequest> {
        let uid = record.uid;
        if self.entries.contains_key(&uid) {
            return Err(DuplicateRequest(uid));
        }
        self.entries.insert(uid, record);
        Ok(())
    }

    /// Atomically remove and return the record for `id`.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Remove and return every record older than the deadline.
    ///
    /// A record expires when `now - issued_at` strictly exceeds the
    /// deadline, so a reply landing exactly on the deadline still completes.
    pub fn sweep(&mut self, now: DateTime<Utc>, deadline: Duration) -> Vec<PendingRequest> {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, record)| now - record.issued_at > deadline)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }
}
