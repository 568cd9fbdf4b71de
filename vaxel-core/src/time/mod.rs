//! ## vaxel-core::time
//! **Monotonic time sources**
//!
//! Everything in the stack is stamped and gated in nanoseconds from a single
//! `Clock`. Production uses [`MonotonicClock`]; deterministic tests drive a
//! [`VirtualClock`] by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Nanoseconds since the owning clock's epoch.
pub type Nanos = u64;

/// Monotonic nanosecond time source.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> Nanos;
}

/// Shared handle to the stack-wide clock.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock anchored to a `std::time::Instant` epoch.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> Nanos {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Deterministic clock for tests: time stands still until the test moves it.
///
/// Clones share the same timeline, so a queue under test and the test itself
/// always agree on "now".
#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start_ns: Nanos) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    /// Moves the shared timeline forward by `ns` nanoseconds.
    #[inline]
    pub fn advance(&self, ns: Nanos) {
        self.now.fetch_add(ns, Ordering::Release);
    }
}

impl Clock for VirtualClock {
    #[inline]
    fn now_ns(&self) -> Nanos {
        self.now.load(Ordering::Acquire)
    }
}
