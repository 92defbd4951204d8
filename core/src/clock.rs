//! Time abstraction for testability.
//!
//! The pending-request table stamps every record with its issue time and the
//! terminator compares those stamps against a deadline. Both go through the
//! [`Clock`] trait so tests can drive time deterministically.

use chrono::{DateTime, Utc};

/// Abstracts "now" so timeout behavior is testable.
///
/// Production code uses [`SystemClock`]; tests use a mock that can be
/// advanced past the sweep deadline without sleeping.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
