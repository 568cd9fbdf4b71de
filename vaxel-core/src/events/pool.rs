//! ## vaxel-core::events::pool
//! **Fixed-capacity event pool with free-on-last-release semantics**
//!
//! The pool owns every event payload slot in the stack. Producers allocate,
//! each delivery target holds its own reference, and the slot goes back on
//! the free list only when the last holder releases it. Free-notify listeners
//! run at that point, on the releasing thread, before the slot becomes
//! allocatable again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::warn;

use vaxel_telemetry::MetricsRecorder;

use super::stats::PoolStats;
use super::{Event, EventId, EventKind, EventMeta, EventRecord, Priority, SwitchIndex};
use crate::time::{Nanos, SharedClock};

/// Pool error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No free slot; backpressure signal to the producer.
    #[error("event pool exhausted")]
    Exhausted,
    /// Stale generation or already-released handle. Programming error on the
    /// caller's side; the free list is left untouched.
    #[error("stale or already released event handle")]
    InvalidHandle,
}

/// What a successful `release` did with the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain; the slot stays allocated.
    Retained,
    /// This was the last reference; listeners ran and the slot is free again.
    Freed,
}

/// Listener invoked when an event's reference count reaches zero.
///
/// Listeners run on the releasing thread and must be idempotent and
/// non-blocking. They observe the final record snapshot, never a live slot.
pub trait FreeNotify: Send + Sync {
    fn on_free(&self, record: &EventRecord);
}

impl<F> FreeNotify for F
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn on_free(&self, record: &EventRecord) {
        self(record)
    }
}

struct Slot {
    generation: u32,
    refs: u32,
    record: Option<EventRecord>,
}

struct SlotTable {
    slots: Vec<Slot>,
    /// Stack of free slot indices; `pop` is the allocation cursor.
    free: Vec<u32>,
}

impl SlotTable {
    /// Resolves a handle to its slot, rejecting stale generations and
    /// already-released handles.
    fn live_slot_mut(&mut self, event: &Event) -> Result<&mut Slot, PoolError> {
        let slot = self
            .slots
            .get_mut(event.slot as usize)
            .ok_or(PoolError::InvalidHandle)?;
        if slot.generation != event.generation || slot.refs == 0 {
            return Err(PoolError::InvalidHandle);
        }
        Ok(slot)
    }
}

/// Fixed-capacity, reference-counted event arena.
pub struct EventPool {
    table: Mutex<SlotTable>,
    listeners: RwLock<[Vec<Arc<dyn FreeNotify>>; EventKind::COUNT]>,
    next_id: AtomicU64,
    clock: SharedClock,
    capacity: usize,
    stats: PoolStats,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl EventPool {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        assert!(capacity > 0, "Pool capacity must be greater than zero");

        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                refs: 0,
                record: None,
            })
            .collect();
        let free = (0..capacity as u32).rev().collect();

        Self {
            table: Mutex::new(SlotTable { slots, free }),
            listeners: RwLock::new(std::array::from_fn(|_| Vec::new())),
            next_id: AtomicU64::new(1),
            clock,
            capacity,
            stats: PoolStats::new(),
            metrics: None,
        }
    }

    /// Pool with Prometheus counters wired in.
    pub fn with_metrics(capacity: usize, clock: SharedClock, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(capacity, clock)
        }
    }

    /// Allocates an event, reference count 1.
    ///
    /// Fails with [`PoolError::Exhausted`] when every slot is live. Safe under
    /// concurrent producers.
    pub fn allocate(
        &self,
        switch: SwitchIndex,
        kind: EventKind,
        priority: Priority,
        payload: Bytes,
    ) -> Result<Event, PoolError> {
        let mut table = self.table.lock();
        let Some(index) = table.free.pop() else {
            drop(table);
            self.stats.record_exhaustion();
            if let Some(metrics) = &self.metrics {
                metrics.pool_exhausted.inc();
            }
            warn!(capacity = self.capacity, "event pool exhausted");
            return Err(PoolError::Exhausted);
        };

        let meta = EventMeta {
            id: EventId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            kind,
            priority,
            switch,
            created_at: self.clock.now_ns(),
        };

        let slot = &mut table.slots[index as usize];
        debug_assert_eq!(slot.refs, 0, "free-list slot had live references");
        slot.refs = 1;
        slot.record = Some(EventRecord {
            meta,
            due: None,
            payload,
        });
        let generation = slot.generation;
        drop(table);

        self.stats.record_allocation();
        if let Some(metrics) = &self.metrics {
            metrics.events_allocated.inc();
        }

        Ok(Event {
            slot: index,
            generation,
            meta,
        })
    }

    /// Mints an additional reference to a live event.
    pub fn retain(&self, event: &Event) -> Result<Event, PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        slot.refs += 1;
        Ok(Event {
            slot: event.slot,
            generation: event.generation,
            meta: event.meta,
        })
    }

    /// Returns a reference. On the last release the record is detached, every
    /// free-notify listener for its kind runs in registration order, and only
    /// then is the slot pushed back on the free list.
    pub fn release(&self, event: Event) -> Result<ReleaseOutcome, PoolError> {
        let record = {
            let mut table = self.table.lock();
            let slot = table.live_slot_mut(&event)?;
            slot.refs -= 1;
            if slot.refs > 0 {
                self.stats.record_release();
                return Ok(ReleaseOutcome::Retained);
            }
            slot.record.take().ok_or(PoolError::InvalidHandle)?
        };

        // Terminal release. The slot is now neither free nor live: listeners
        // run without the table lock, and nothing can reuse the slot until
        // it is refiled below.
        self.notify_freed(&record);

        let mut table = self.table.lock();
        let slot = &mut table.slots[event.slot as usize];
        slot.generation = slot.generation.wrapping_add(1);
        table.free.push(event.slot);
        drop(table);

        self.stats.record_release();
        self.stats.record_free();
        if let Some(metrics) = &self.metrics {
            metrics.events_released.inc();
        }

        Ok(ReleaseOutcome::Freed)
    }

    /// Appends a listener to the ordered free-notify list for `kind`.
    pub fn register_free_notify(&self, kind: EventKind, listener: Arc<dyn FreeNotify>) {
        self.listeners.write()[kind as usize].push(listener);
    }

    /// Stamps the record's due timestamp. Only the first schedule sticks; the
    /// due timestamp is immutable afterwards.
    pub fn set_due(&self, event: &Event, due: Nanos) -> Result<(), PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        let record = slot.record.as_mut().ok_or(PoolError::InvalidHandle)?;
        if record.due.is_none() {
            record.due = Some(due);
        }
        Ok(())
    }

    /// Zero-copy view of the payload buffer.
    pub fn payload(&self, event: &Event) -> Result<Bytes, PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        let record = slot.record.as_ref().ok_or(PoolError::InvalidHandle)?;
        Ok(record.payload.clone())
    }

    /// Replaces the payload. Only the single logical owner of the event may
    /// call this while other references exist.
    pub fn set_payload(&self, event: &Event, payload: Bytes) -> Result<(), PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        let record = slot.record.as_mut().ok_or(PoolError::InvalidHandle)?;
        record.payload = payload;
        Ok(())
    }

    /// Copy of the full record.
    pub fn snapshot(&self, event: &Event) -> Result<EventRecord, PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        slot.record.clone().ok_or(PoolError::InvalidHandle)
    }

    /// Current reference count of a live event.
    pub fn ref_count(&self, event: &Event) -> Result<u32, PoolError> {
        let mut table = self.table.lock();
        let slot = table.live_slot_mut(event)?;
        Ok(slot.refs)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.table.lock().free.len()
    }

    /// Number of live slots. `available() + allocated() == capacity()` holds
    /// whenever no release is mid-flight.
    pub fn allocated(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    fn notify_freed(&self, record: &EventRecord) {
        let listeners = self.listeners.read();
        for listener in &listeners[record.meta.kind as usize] {
            listener.on_free(record);
        }
    }
}
