//! Injectable clock for the Bounded Recency Cache.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Anything that can report the current time in nanoseconds.
pub trait Clock: Send + Sync + 'static {
    /// Current time, in nanoseconds, on whatever epoch the clock uses.
    /// Only relative ordering matters to the cache.
    fn now(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_nanos() as i64
    }
}

/// A clock that only advances when told to. Used by tests to construct
/// deterministic eviction scenarios.
#[derive(Clone)]
pub struct MockClock {
    nanos: Arc<AtomicI64>,
}

impl MockClock {
    /// A mock clock starting at time zero.
    pub fn new() -> Self {
        MockClock { nanos: Arc::new(AtomicI64::new(0)) }
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.nanos.fetch_add(secs * 1_000_000_000, Ordering::SeqCst);
    }

    /// Advance the clock by an arbitrary number of nanoseconds.
    pub fn advance_nanos(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
