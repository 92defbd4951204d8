//! Request identifier allocation.
//!
//! Every broker-bound request carries a numeric `msg_id` that the reply
//! echoes back; the demultiplexer uses it to find the waiting responder.
//! Ids must be unique among currently-outstanding requests and must fit in
//! the wire encoding's 53-bit safe integer range. They are released when the
//! request completes or times out and may be reused afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Largest id representable losslessly as a JSON number (2^53 - 1).
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

/// A correlation identifier for one broker round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw wire value, rejecting anything outside the 53-bit range.
    #[must_use]
    pub fn from_wire(raw: u64) -> Option<Self> {
        (raw <= MAX_SAFE_ID).then_some(Self(raw))
    }

    /// The numeric value as carried on the wire.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Issues unique request ids and tracks which are outstanding.
///
/// Generation is a monotonic counter modulo 2^53 with an allocated-set
/// collision check: deterministic for tests, collision-free among
/// outstanding ids, and safe across counter wrap-around.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
    outstanding: HashSet<u64>,
}

impl IdAllocator {
    /// Create an allocator starting at id 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id not currently outstanding.
    pub fn allocate(&mut self) -> RequestId {
        loop {
            let candidate = self.next;
            self.next = (self.next + 1) & MAX_SAFE_ID;
            if self.outstanding.insert(candidate) {
                return RequestId(candidate);
            }
        }
    }

    /// Release an id so it may be reused. Idempotent.
    pub fn release(&mut self, id: RequestId) {
        self.outstanding.remove(&id.0);
    }

    /// Whether the id is currently outstanding.
    #[must_use]
    pub fn is_allocated(&self, id: RequestId) -> bool {
        self.outstanding.contains(&id.0)
    }

    /// Number of outstanding ids.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allocates_distinct_ids() {
        let mut alloc = IdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_ne!(a, b);
        assert!(alloc.is_allocated(a));
        assert!(alloc.is_allocated(b));
    }

    #[test]
    fn release_is_idempotent() {
        let mut alloc = IdAllocator::new();
        let a = alloc.allocate();
        alloc.release(a);
        alloc.release(a);
        assert!(!alloc.is_allocated(a));
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn released_ids_may_be_reused_after_wrap() {
        let mut alloc = IdAllocator {
            next: MAX_SAFE_ID,
            outstanding: HashSet::new(),
        };
        let last = alloc.allocate();
        assert_eq!(last.value(), MAX_SAFE_ID);
        // Counter wrapped back to 0.
        let first = alloc.allocate();
        assert_eq!(first.value(), 0);
    }

    #[test]
    fn skips_ids_still_outstanding() {
        let mut alloc = IdAllocator::new();
        let a = alloc.allocate();
        // Force the counter back onto the outstanding id.
        alloc.next = a.value();
        let b = alloc.allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn from_wire_rejects_out_of_range() {
        assert!(RequestId::from_wire(MAX_SAFE_ID).is_some());
        assert!(RequestId::from_wire(MAX_SAFE_ID + 1).is_none());
    }

    proptest! {
        // No two outstanding ids are ever equal, regardless of the
        // allocate/release interleaving.
        #[test]
        fn outstanding_ids_stay_unique(ops in proptest::collection::vec(0u8..3, 1..200)) {
            let mut alloc = IdAllocator::new();
            let mut held: Vec<RequestId> = Vec::new();
            for op in ops {
                match op {
                    0 | 1 => held.push(alloc.allocate()),
                    _ => {
                        if let Some(id) = held.pop() {
                            alloc.release(id);
                        }
                    }
                }
                let unique: HashSet<_> = held.iter().copied().collect();
                prop_assert_eq!(unique.len(), held.len());
                prop_assert_eq!(alloc.outstanding(), held.len());
                for id in &held {
                    prop_assert!(alloc.is_allocated(*id));
                }
            }
        }
    }
}
