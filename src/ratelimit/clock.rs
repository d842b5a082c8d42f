//! Time sources for the limiter.
//!
//! Window arithmetic is done in whole epoch seconds, which is also what the
//! store uses as sorted-set scores.

use parking_lot::Mutex;
use std::sync::Arc;

/// Source of the current time in epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and diagnostics.
///
/// Clones share the same time value, so advancing one clone advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<i64>>,
}

impl MockClock {
    /// Create a mock clock frozen at `start` epoch seconds.
    pub fn new(start: i64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance(&self, secs: i64) {
        *self.current.lock() += secs;
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: i64) {
        *self.current.lock() = now;
    }
}

impl Clock for MockClock {
    fn now(&self) -> i64 {
        *self.current.lock()
    }
}
