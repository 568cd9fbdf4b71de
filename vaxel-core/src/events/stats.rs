//! ## vaxel-core::events::stats
//! **Pool allocation statistics and tracking**
//!
//! Atomic counters so producers and consumers can update statistics without
//! taking the pool lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Event pool statistics tracker.
#[derive(Debug, Default)]
pub struct PoolStats {
    allocations: AtomicU64,
    releases: AtomicU64,
    frees: AtomicU64,
    exhaustions: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful allocation.
    #[inline]
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful release call (terminal or not).
    #[inline]
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal release that returned a slot to the free list.
    #[inline]
    pub fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an allocation rejected because the pool was empty.
    #[inline]
    pub fn record_exhaustion(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    pub fn exhaustions(&self) -> u64 {
        self.exhaustions.load(Ordering::Relaxed)
    }
}
