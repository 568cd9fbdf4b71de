//! ## vaxel-core::queue
//! **Time-gated, bounded, per-consumer delay queue**
//!
//! Not a plain FIFO: entries are kept ordered by due timestamp ascending,
//! FIFO among equal due times, and `get` blocks until the head is both
//! present and due. A single queue-wide lock covers every structural change;
//! the consumer wait is condition-variable based and recomputes the remaining
//! time after every wake, so inserting an earlier-due event shortens the wait
//! instead of being discovered late.
//!
//! `add` never blocks: a full queue is a backpressure signal the producer
//! must handle, which keeps interrupt-reachable paths bounded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use vaxel_telemetry::MetricsRecorder;

use crate::events::{Event, EventId, EventKind, Priority};
use crate::time::{Nanos, SharedClock};

pub mod stats;

pub use stats::{LatencyStats, QueueStats};

/// Rejected `add`. Carries the event back so the caller can release or
/// re-route its reference instead of leaking it.
#[derive(Debug, Error)]
pub enum AddError {
    /// The queue is at capacity. Deliberate backpressure, never a wait.
    #[error("delay queue at capacity")]
    Full(Event),
    /// The queue was closed for shutdown.
    #[error("delay queue closed")]
    Closed(Event),
}

impl AddError {
    /// Recovers the rejected event handle.
    pub fn into_event(self) -> Event {
        match self {
            AddError::Full(event) | AddError::Closed(event) => event,
        }
    }
}

/// Non-add queue status conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Nothing due right now (`try_get`).
    #[error("no due event available")]
    Empty,
    /// The event is not queued here; either never was, or `get` won the race.
    #[error("event not present in this queue")]
    NotFound,
    /// The queue was closed and every due event has been drained.
    #[error("delay queue closed")]
    Closed,
}

/// Non-blocking snapshot of the queue head.
#[derive(Debug, Clone, Copy)]
pub struct QueueHead {
    pub id: EventId,
    pub kind: EventKind,
    pub priority: Priority,
    pub due: Nanos,
}

struct DelayedEntry {
    event: Event,
    due: Nanos,
}

struct QueueInner {
    entries: VecDeque<DelayedEntry>,
    stats: QueueStats,
    closed: bool,
}

/// Thread-safe, time-ordered, bounded event queue.
pub struct DelayQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
    clock: SharedClock,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl DelayQueue {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        assert!(capacity > 0, "Queue capacity must be greater than zero");
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                stats: QueueStats::default(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            clock,
            metrics: None,
        }
    }

    /// Queue whose pop latency also feeds the Prometheus delivery-latency
    /// histogram.
    pub fn with_metrics(capacity: usize, clock: SharedClock, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(capacity, clock)
        }
    }

    /// Schedules an event `delay` from now.
    pub fn add(&self, event: Event, delay: Duration) -> Result<(), AddError> {
        let due = self.clock.now_ns().saturating_add(delay.as_nanos() as u64);
        self.add_at(event, due)
    }

    /// Schedules an event at an absolute due timestamp. The dispatcher uses
    /// this so one computed deadline fans out to every recipient queue.
    pub fn add_at(&self, event: Event, due: Nanos) -> Result<(), AddError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            inner.stats.rejected += 1;
            return Err(AddError::Closed(event));
        }
        if inner.entries.len() >= self.capacity {
            inner.stats.rejected += 1;
            return Err(AddError::Full(event));
        }

        // Ascending due time; equal deadlines keep insertion order.
        let pos = inner.entries.partition_point(|entry| entry.due <= due);
        inner.entries.insert(pos, DelayedEntry { event, due });
        inner.stats.posted += 1;

        if pos == 0 {
            // New earliest deadline; a blocked consumer must re-evaluate.
            self.available.notify_one();
        }
        Ok(())
    }

    /// Blocks until the head event exists and its due timestamp has elapsed,
    /// then removes and returns it.
    ///
    /// After `close`, remaining due events are still handed out; once none
    /// are left this reports [`QueueError::Closed`].
    pub fn get(&self) -> Result<Event, QueueError> {
        let mut inner = self.inner.lock();
        loop {
            let now = self.clock.now_ns();
            match inner.entries.front().map(|entry| entry.due) {
                Some(due) if due <= now => {
                    if let Some(entry) = inner.entries.pop_front() {
                        inner.stats.popped += 1;
                        self.observe_latency(&mut inner, now.saturating_sub(entry.due));
                        if let Some(next) = inner.entries.front() {
                            if next.due <= now {
                                // More work is already due; pass the wake on.
                                self.available.notify_one();
                            }
                        }
                        return Ok(entry.event);
                    }
                }
                Some(due) => {
                    if inner.closed {
                        return Err(QueueError::Closed);
                    }
                    let remaining = Duration::from_nanos(due - now);
                    let _ = self.available.wait_for(&mut inner, remaining);
                }
                None => {
                    if inner.closed {
                        return Err(QueueError::Closed);
                    }
                    self.available.wait(&mut inner);
                }
            }
        }
    }

    /// Non-blocking `get`: the head if it is due, otherwise a status.
    pub fn try_get(&self) -> Result<Event, QueueError> {
        let mut inner = self.inner.lock();
        let now = self.clock.now_ns();
        match inner.entries.front().map(|entry| entry.due) {
            Some(due) if due <= now => match inner.entries.pop_front() {
                Some(entry) => {
                    inner.stats.popped += 1;
                    self.observe_latency(&mut inner, now.saturating_sub(entry.due));
                    Ok(entry.event)
                }
                None => Err(QueueError::Empty),
            },
            Some(_) => Err(QueueError::Empty),
            None if inner.closed => Err(QueueError::Closed),
            None => Err(QueueError::Empty),
        }
    }

    /// Head snapshot without removal and without blocking.
    pub fn peek(&self) -> Option<QueueHead> {
        let inner = self.inner.lock();
        inner.entries.front().map(|entry| QueueHead {
            id: entry.event.id(),
            kind: entry.event.kind(),
            priority: entry.event.priority(),
            due: entry.due,
        })
    }

    /// Cancels a not-yet-delivered event anywhere in the sequence, returning
    /// the handle so the caller can release its reference.
    ///
    /// Losing the race against `get` is well defined: the consumer got the
    /// event and this reports [`QueueError::NotFound`].
    pub fn remove(&self, id: EventId) -> Result<Event, QueueError> {
        let mut inner = self.inner.lock();
        let pos = inner
            .entries
            .iter()
            .position(|entry| entry.event.id() == id)
            .ok_or(QueueError::NotFound)?;
        let entry = inner.entries.remove(pos).ok_or(QueueError::NotFound)?;
        inner.stats.cancelled += 1;
        Ok(entry.event)
    }

    /// Removes every queued event regardless of due time. Shutdown path; the
    /// caller owns releasing the returned references.
    pub fn drain(&self) -> Vec<Event> {
        let mut inner = self.inner.lock();
        inner.stats.cancelled += inner.entries.len() as u64;
        inner.entries.drain(..).map(|entry| entry.event).collect()
    }

    /// Marks the queue closed and wakes every blocked consumer. Subsequent
    /// `add` calls are rejected; `get` drains due events then reports closed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Fast snapshot of the current element count.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }

    fn observe_latency(&self, inner: &mut QueueInner, latency: Nanos) {
        inner.stats.latency.observe(latency);
        if let Some(metrics) = &self.metrics {
            metrics.delivery_latency.observe(latency as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::pool::EventPool;
    use crate::events::{EventKind, Priority, SwitchIndex};
    use crate::time::{MonotonicClock, VirtualClock};
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn fixture(clock: SharedClock, capacity: usize) -> (Arc<EventPool>, Arc<DelayQueue>) {
        (
            Arc::new(EventPool::new(capacity.max(8), clock.clone())),
            Arc::new(DelayQueue::new(capacity, clock)),
        )
    }

    fn alloc(pool: &EventPool, kind: EventKind) -> Event {
        pool.allocate(SwitchIndex(0), kind, Priority::Normal, Bytes::new())
            .unwrap()
    }

    #[test]
    fn zero_delay_add_then_get_returns_once() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 4);

        let event = alloc(&pool, EventKind::PacketRx);
        let id = event.id();
        queue.add(event, Duration::ZERO).unwrap();

        let head = queue.peek().unwrap();
        let got = queue.get().unwrap();
        assert_eq!(got.id(), id);
        assert!(clock.now_ns() >= head.due);

        assert_eq!(queue.try_get().unwrap_err(), QueueError::Empty);
        pool.release(got).unwrap();
    }

    #[test]
    fn get_waits_for_the_due_timestamp() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 4);

        let event = alloc(&pool, EventKind::MacAging);
        queue.add(event, Duration::from_millis(30)).unwrap();
        let head = queue.peek().unwrap();

        let got = queue.get().unwrap();
        assert!(
            clock.now_ns() >= head.due,
            "get returned before the due timestamp"
        );
        pool.release(got).unwrap();
    }

    #[test]
    fn due_order_beats_insertion_order() {
        let base = 1_000_000;
        let clock = Arc::new(VirtualClock::new(base));
        let (pool, queue) = fixture(clock.clone(), 8);

        let late = alloc(&pool, EventKind::PacketRx);
        let late_id = late.id();
        let early = alloc(&pool, EventKind::PacketRx);
        let early_id = early.id();

        queue.add_at(late, base + 500).unwrap();
        queue.add_at(early, base + 100).unwrap();

        clock.advance(1_000);
        let first = queue.try_get().unwrap();
        let second = queue.try_get().unwrap();
        assert_eq!(first.id(), early_id);
        assert_eq!(second.id(), late_id);

        pool.release(first).unwrap();
        pool.release(second).unwrap();
    }

    #[test]
    fn equal_due_times_stay_fifo() {
        let clock = Arc::new(VirtualClock::new(100));
        let (pool, queue) = fixture(clock.clone(), 8);

        let mut ids = Vec::new();
        for _ in 0..4 {
            let event = alloc(&pool, EventKind::LinkTransition);
            ids.push(event.id());
            queue.add_at(event, 400).unwrap();
        }

        clock.advance(1_000);
        for expected in ids {
            let event = queue.try_get().unwrap();
            assert_eq!(event.id(), expected);
            pool.release(event).unwrap();
        }
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 2);

        let e1 = alloc(&pool, EventKind::PacketRx);
        let e2 = alloc(&pool, EventKind::PacketRx);
        let e2_id = e2.id();
        let e3 = alloc(&pool, EventKind::PacketRx);

        queue.add(e1, Duration::from_millis(100)).unwrap();
        queue.add(e2, Duration::from_millis(10)).unwrap();

        let rejected = queue.add(e3, Duration::ZERO).unwrap_err();
        assert!(matches!(rejected, AddError::Full(_)));
        pool.release(rejected.into_event()).unwrap();
        assert_eq!(queue.stats().rejected, 1);

        // Despite insertion order, the earlier-due event is delivered first.
        let started = Instant::now();
        let head = queue.peek().unwrap();
        let got = queue.get().unwrap();
        assert_eq!(got.id(), e2_id);
        assert!(clock.now_ns() >= head.due);
        assert!(
            started.elapsed() < Duration::from_millis(90),
            "head delivery waited on the later event"
        );
        pool.release(got).unwrap();

        for event in queue.drain() {
            pool.release(event).unwrap();
        }
    }

    #[test]
    fn earlier_due_insertion_wakes_blocked_consumer() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 4);

        let slow = alloc(&pool, EventKind::PacketRx);
        queue.add(slow, Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let event = queue.get().unwrap();
                (event, started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        let fast = alloc(&pool, EventKind::TableChange);
        let fast_id = fast.id();
        queue.add(fast, Duration::from_millis(10)).unwrap();

        let (event, elapsed) = consumer.join().unwrap();
        assert_eq!(event.id(), fast_id);
        assert!(
            elapsed < Duration::from_millis(200),
            "blocked get missed the earlier deadline, woke after {elapsed:?}"
        );
        pool.release(event).unwrap();

        for event in queue.drain() {
            pool.release(event).unwrap();
        }
    }

    #[test]
    fn add_wakes_consumer_blocked_on_empty_queue() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 4);

        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.get().unwrap())
        };

        std::thread::sleep(Duration::from_millis(10));
        let event = alloc(&pool, EventKind::PacketRx);
        let id = event.id();
        queue.add(event, Duration::ZERO).unwrap();

        let got = consumer.join().unwrap();
        assert_eq!(got.id(), id);
        pool.release(got).unwrap();
    }

    #[test]
    fn remove_cancels_a_middle_entry() {
        let clock = Arc::new(VirtualClock::new(0));
        let (pool, queue) = fixture(clock.clone(), 8);

        let a = alloc(&pool, EventKind::PacketRx);
        let b = alloc(&pool, EventKind::PacketRx);
        let c = alloc(&pool, EventKind::PacketRx);
        let b_id = b.id();

        queue.add_at(a, 100).unwrap();
        queue.add_at(b, 200).unwrap();
        queue.add_at(c, 300).unwrap();

        let removed = queue.remove(b_id).unwrap();
        assert_eq!(removed.id(), b_id);
        assert_eq!(queue.len(), 2);
        pool.release(removed).unwrap();

        assert_eq!(queue.remove(b_id).unwrap_err(), QueueError::NotFound);

        for event in queue.drain() {
            pool.release(event).unwrap();
        }
    }

    #[test]
    fn remove_races_get_with_exactly_one_winner() {
        for round in 0..20 {
            let clock: SharedClock = Arc::new(MonotonicClock::new());
            let (pool, queue) = fixture(clock.clone(), 4);

            let event = alloc(&pool, EventKind::MacAging);
            let id = event.id();
            queue.add(event, Duration::from_millis(2)).unwrap();

            let consumer = {
                let queue = queue.clone();
                std::thread::spawn(move || queue.get())
            };
            if round % 2 == 0 {
                std::thread::sleep(Duration::from_millis(4));
            }

            let removed = queue.remove(id);
            if removed.is_ok() {
                // Nothing left for the consumer; unblock it.
                queue.close();
            }
            let got = consumer.join().unwrap();

            match (removed, got) {
                (Ok(event), Err(QueueError::Closed)) => pool.release(event).map(|_| ()).unwrap(),
                (Err(QueueError::NotFound), Ok(event)) => {
                    assert_eq!(event.id(), id);
                    pool.release(event).map(|_| ()).unwrap();
                }
                (removed, got) => panic!("race had no single winner: {removed:?} / {got:?}"),
            }
            assert_eq!(pool.available(), pool.capacity());
        }
    }

    #[test]
    fn close_drains_due_events_then_reports_closed() {
        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let (pool, queue) = fixture(clock.clone(), 4);

        let event = alloc(&pool, EventKind::PacketRx);
        let id = event.id();
        queue.add(event, Duration::ZERO).unwrap();
        queue.close();

        let got = queue.get().unwrap();
        assert_eq!(got.id(), id);
        assert_eq!(queue.get().unwrap_err(), QueueError::Closed);
        pool.release(got).unwrap();

        let late = alloc(&pool, EventKind::PacketRx);
        let rejected = queue.add(late, Duration::ZERO).unwrap_err();
        assert!(matches!(rejected, AddError::Closed(_)));
        pool.release(rejected.into_event()).unwrap();
    }

    #[test]
    fn pop_feeds_the_delivery_latency_histogram() {
        let clock = Arc::new(VirtualClock::new(0));
        let metrics = Arc::new(MetricsRecorder::new());
        let pool = Arc::new(EventPool::new(4, clock.clone()));
        let queue = DelayQueue::with_metrics(4, clock.clone(), metrics.clone());

        let event = alloc(&pool, EventKind::PacketRx);
        queue.add_at(event, 100).unwrap();

        // Popped 150ns past its due timestamp of 100.
        clock.advance(250);
        let event = queue.try_get().unwrap();
        pool.release(event).unwrap();

        assert_eq!(metrics.delivery_latency.get_sample_count(), 1);
        assert_eq!(metrics.delivery_latency.get_sample_sum(), 150.0);
    }

    #[test]
    fn statistics_track_queue_activity() {
        let clock = Arc::new(VirtualClock::new(0));
        let (pool, queue) = fixture(clock.clone(), 2);

        let a = alloc(&pool, EventKind::PacketRx);
        let b = alloc(&pool, EventKind::PacketRx);
        queue.add_at(a, 100).unwrap();
        queue.add_at(b, 50).unwrap();

        clock.advance(200);
        let first = queue.try_get().unwrap();
        pool.release(first).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.popped, 1);
        // Popped 150ns past its due timestamp of 50.
        assert_eq!(stats.latency.min_ns(), Some(150));
        assert_eq!(stats.latency.max_ns(), Some(150));

        for event in queue.drain() {
            pool.release(event).unwrap();
        }
        assert_eq!(queue.stats().cancelled, 1);
    }

    proptest! {
        #[test]
        fn pop_order_is_sorted_by_due_fifo_on_ties(dues in proptest::collection::vec(0u64..8, 1..40)) {
            let clock = Arc::new(VirtualClock::new(0));
            let pool = Arc::new(EventPool::new(64, clock.clone()));
            let queue = DelayQueue::new(64, clock.clone());

            let mut expected: Vec<(u64, u64)> = Vec::new(); // (due, id), id order encodes insertion
            for due in dues {
                let event = pool
                    .allocate(SwitchIndex(0), EventKind::PacketRx, Priority::Normal, Bytes::new())
                    .unwrap();
                expected.push((due, event.id().0));
                queue.add_at(event, due).unwrap();
            }
            expected.sort_by_key(|(due, id)| (*due, *id));

            clock.advance(100);
            for (due, id) in expected {
                let event = queue.try_get().unwrap();
                prop_assert_eq!(event.id().0, id, "wrong order for due {}", due);
                pool.release(event).unwrap();
            }
            prop_assert_eq!(queue.try_get().unwrap_err(), QueueError::Empty);
        }
    }
}
