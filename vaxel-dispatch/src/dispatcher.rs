//! Event dispatch: override consult, then global + local fan-out.
//!
//! Every queue posting holds its own pool reference, so the payload is freed
//! only once the global consumer, every matching local consumer, and the
//! producer itself have released. A full queue drops that one posting and the
//! fan-out continues; the rejection shows up in the returned report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, instrument, trace, warn};

use vaxel_core::events::pool::EventPool;
use vaxel_core::events::{Event, EventKind, EventMask, Priority, SwitchIndex};
use vaxel_core::queue::DelayQueue;
use vaxel_core::time::{Nanos, SharedClock};
use vaxel_telemetry::MetricsRecorder;

use crate::error::DispatchError;
use crate::registry::{
    LocalDelivery, LocalDeliveryRegistry, OverrideHandler, OverrideRegistry, ProcessId,
};

/// One fan-out destination, named for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTarget {
    Global,
    Local(ProcessId),
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryTarget::Global => write!(f, "global"),
            DeliveryTarget::Local(process) => write!(f, "local/{process}"),
        }
    }
}

/// Outcome of one dispatch, including partial-delivery detail.
#[derive(Debug)]
pub struct DispatchReport {
    /// The event went to a per-switch override handler; no fan-out happened.
    pub overridden: bool,
    /// Queues that accepted a reference.
    pub delivered: usize,
    /// Targets whose queue rejected the posting.
    pub rejected: Vec<DeliveryTarget>,
}

impl DispatchReport {
    pub fn is_partial(&self) -> bool {
        !self.rejected.is_empty()
    }
}

/// Routes produced events to the override handler or the delay queues.
pub struct Dispatcher {
    pool: Arc<EventPool>,
    global: Arc<DelayQueue>,
    overrides: OverrideRegistry,
    locals: LocalDeliveryRegistry,
    clock: SharedClock,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<EventPool>,
        global: Arc<DelayQueue>,
        clock: SharedClock,
        max_local_registrations: usize,
    ) -> Self {
        Self {
            pool,
            global,
            overrides: OverrideRegistry::new(),
            locals: LocalDeliveryRegistry::new(max_local_registrations),
            clock,
            metrics: None,
        }
    }

    /// Wires Prometheus counters into the dispatch path.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Allocates and dispatches in one step. The usual producer entry point;
    /// callers in interrupt context must treat any error as log-and-drop.
    pub fn produce(
        &self,
        switch: SwitchIndex,
        kind: EventKind,
        priority: Priority,
        payload: Bytes,
        delay: Duration,
    ) -> Result<DispatchReport, DispatchError> {
        let event = self.pool.allocate(switch, kind, priority, payload)?;
        self.dispatch(event, delay)
    }

    /// Routes one event: override handler if the switch has one, otherwise
    /// the global queue plus every local registration whose mask matches.
    #[instrument(skip_all, fields(event = %event.id(), kind = ?event.kind(), switch = %event.switch()))]
    pub fn dispatch(&self, event: Event, delay: Duration) -> Result<DispatchReport, DispatchError> {
        if let Some(handler) = self.overrides.lookup(event.switch()) {
            trace!("override handler replaces default delivery");
            if let Some(metrics) = &self.metrics {
                metrics.events_overridden.inc();
            }
            handler.handle(&self.pool, event);
            return Ok(DispatchReport {
                overridden: true,
                delivered: 0,
                rejected: Vec::new(),
            });
        }

        let due = self.clock.now_ns().saturating_add(delay.as_nanos() as u64);
        if let Err(err) = self.pool.set_due(&event, due) {
            let _ = self.pool.release(event);
            return Err(err.into());
        }

        let mut report = DispatchReport {
            overridden: false,
            delivered: 0,
            rejected: Vec::new(),
        };

        self.post(&event, due, DeliveryTarget::Global, &self.global, &mut report);
        for registration in self.locals.snapshot() {
            if registration.mask.contains(event.kind()) {
                self.post(
                    &event,
                    due,
                    DeliveryTarget::Local(registration.process),
                    &registration.queue,
                    &mut report,
                );
            }
        }

        // Drop the producer's transient reference; recipients hold their own.
        let _ = self.pool.release(event)?;

        if let Some(metrics) = &self.metrics {
            metrics.events_dispatched.inc();
        }
        if report.is_partial() {
            warn!(
                delivered = report.delivered,
                rejected = report.rejected.len(),
                "partial delivery, one or more queues were full"
            );
        } else {
            debug!(delivered = report.delivered, "event dispatched");
        }
        Ok(report)
    }

    fn post(
        &self,
        event: &Event,
        due: Nanos,
        target: DeliveryTarget,
        queue: &DelayQueue,
        report: &mut DispatchReport,
    ) {
        let reference = match self.pool.retain(event) {
            Ok(reference) => reference,
            Err(err) => {
                error!(%target, %err, "could not retain event for target");
                report.rejected.push(target);
                return;
            }
        };

        match queue.add_at(reference, due) {
            Ok(()) => report.delivered += 1,
            Err(add_err) => {
                warn!(%target, "delay queue rejected event: {add_err}");
                if let Err(err) = self.pool.release(add_err.into_event()) {
                    error!(%err, "failed to release rejected reference");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.events_rejected.inc();
                }
                report.rejected.push(target);
            }
        }
    }

    /// Installs a per-switch override handler. Fails if one is present.
    pub fn set_switch_override(
        &self,
        switch: SwitchIndex,
        handler: Arc<dyn OverrideHandler>,
    ) -> Result<(), DispatchError> {
        self.overrides.set(switch, handler)
    }

    /// Removes a per-switch override, restoring default delivery.
    pub fn clear_switch_override(&self, switch: SwitchIndex) -> Option<Arc<dyn OverrideHandler>> {
        self.overrides.clear(switch)
    }

    /// Registers a local delivery consumer and returns its queue.
    pub fn register_local_delivery(
        &self,
        process: ProcessId,
        mask: EventMask,
        queue_capacity: usize,
    ) -> Result<Arc<DelayQueue>, DispatchError> {
        let queue = Arc::new(match &self.metrics {
            Some(metrics) => {
                DelayQueue::with_metrics(queue_capacity, self.clock.clone(), metrics.clone())
            }
            None => DelayQueue::new(queue_capacity, self.clock.clone()),
        });
        self.locals.register(process, mask, queue.clone())?;
        Ok(queue)
    }

    /// Drops a local delivery registration. The caller owns closing the
    /// returned queue and joining its worker.
    pub fn deregister_local_delivery(&self, process: ProcessId) -> Option<LocalDelivery> {
        self.locals.deregister(process)
    }

    pub fn local_snapshot(&self) -> Vec<LocalDelivery> {
        self.locals.snapshot()
    }

    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }

    pub fn global_queue(&self) -> &Arc<DelayQueue> {
        &self.global
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vaxel_core::events::pool::PoolError;
    use vaxel_core::events::EventRecord;
    use vaxel_core::time::VirtualClock;

    fn dispatcher_fixture(pool_capacity: usize) -> (Arc<VirtualClock>, Dispatcher) {
        let clock = Arc::new(VirtualClock::new(1_000));
        let pool = Arc::new(EventPool::new(pool_capacity, clock.clone()));
        let global = Arc::new(DelayQueue::new(pool_capacity, clock.clone()));
        let dispatcher = Dispatcher::new(pool, global, clock.clone(), 8);
        (clock, dispatcher)
    }

    fn drain_and_release(dispatcher: &Dispatcher, queue: &DelayQueue) {
        for event in queue.drain() {
            dispatcher.pool().release(event).unwrap();
        }
    }

    #[test]
    fn fan_out_respects_capability_masks() {
        let (clock, dispatcher) = dispatcher_fixture(8);

        let narrow = dispatcher
            .register_local_delivery(
                ProcessId(1),
                EventMask::of(&[EventKind::PacketRx]),
                4,
            )
            .unwrap();
        let wide = dispatcher
            .register_local_delivery(
                ProcessId(2),
                EventMask::of(&[EventKind::PacketRx, EventKind::MacAging]),
                4,
            )
            .unwrap();

        let report = dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::MacAging,
                Priority::Normal,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap();

        assert!(!report.overridden);
        assert_eq!(report.delivered, 2); // global + the wide registration
        assert!(report.rejected.is_empty());
        assert_eq!(dispatcher.global_queue().len(), 1);
        assert_eq!(narrow.len(), 0);
        assert_eq!(wide.len(), 1);

        clock.advance(1);
        let from_global = dispatcher.global_queue().try_get().unwrap();
        let from_wide = wide.try_get().unwrap();
        assert_eq!(from_global.id(), from_wide.id());

        dispatcher.pool().release(from_global).unwrap();
        dispatcher.pool().release(from_wide).unwrap();
        assert_eq!(dispatcher.pool().available(), dispatcher.pool().capacity());
    }

    struct RecordingOverride {
        seen: Mutex<Vec<EventRecord>>,
    }

    impl OverrideHandler for RecordingOverride {
        fn handle(&self, pool: &EventPool, event: Event) {
            if let Ok(record) = pool.snapshot(&event) {
                self.seen.lock().push(record);
            }
            pool.release(event).unwrap();
        }
    }

    #[test]
    fn override_replaces_default_delivery() {
        let (_clock, dispatcher) = dispatcher_fixture(4);
        let local = dispatcher
            .register_local_delivery(ProcessId(1), EventMask::all(), 4)
            .unwrap();

        let handler = Arc::new(RecordingOverride {
            seen: Mutex::new(Vec::new()),
        });
        dispatcher
            .set_switch_override(SwitchIndex(2), handler.clone())
            .unwrap();

        let report = dispatcher
            .produce(
                SwitchIndex(2),
                EventKind::LinkTransition,
                Priority::High,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap();

        assert!(report.overridden);
        assert_eq!(report.delivered, 0);
        assert_eq!(handler.seen.lock().len(), 1);
        assert!(dispatcher.global_queue().is_empty());
        assert!(local.is_empty());
        assert_eq!(dispatcher.pool().available(), dispatcher.pool().capacity());

        // Other switches still take the default path.
        let report = dispatcher
            .produce(
                SwitchIndex(3),
                EventKind::LinkTransition,
                Priority::High,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap();
        assert!(!report.overridden);
        assert_eq!(report.delivered, 2);

        drain_and_release(&dispatcher, dispatcher.global_queue());
        drain_and_release(&dispatcher, &local);
        assert_eq!(dispatcher.pool().available(), dispatcher.pool().capacity());
    }

    #[test]
    fn cleared_override_restores_fan_out() {
        let (_clock, dispatcher) = dispatcher_fixture(4);
        let handler = Arc::new(RecordingOverride {
            seen: Mutex::new(Vec::new()),
        });
        dispatcher
            .set_switch_override(SwitchIndex(0), handler.clone())
            .unwrap();
        assert!(dispatcher.clear_switch_override(SwitchIndex(0)).is_some());

        let report = dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::PacketRx,
                Priority::Normal,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap();
        assert!(!report.overridden);
        assert!(handler.seen.lock().is_empty());

        drain_and_release(&dispatcher, dispatcher.global_queue());
    }

    #[test]
    fn full_local_queue_does_not_block_other_targets() {
        let (_clock, dispatcher) = dispatcher_fixture(8);
        let tiny = dispatcher
            .register_local_delivery(ProcessId(9), EventMask::all(), 1)
            .unwrap();

        let first = dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::PacketRx,
                Priority::Normal,
                Bytes::new(),
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(first.delivered, 2);

        // The tiny queue is now full; the global queue keeps receiving.
        let second = dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::PacketRx,
                Priority::Normal,
                Bytes::new(),
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(second.delivered, 1);
        assert_eq!(second.rejected, vec![DeliveryTarget::Local(ProcessId(9))]);
        assert!(second.is_partial());
        assert_eq!(dispatcher.global_queue().len(), 2);
        assert_eq!(tiny.len(), 1);

        drain_and_release(&dispatcher, dispatcher.global_queue());
        drain_and_release(&dispatcher, &tiny);
        assert_eq!(dispatcher.pool().available(), dispatcher.pool().capacity());
    }

    #[test]
    fn exhausted_pool_surfaces_to_the_producer() {
        let (_clock, dispatcher) = dispatcher_fixture(1);
        let held = dispatcher
            .pool()
            .allocate(
                SwitchIndex(0),
                EventKind::PacketRx,
                Priority::Normal,
                Bytes::new(),
            )
            .unwrap();

        let err = dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::PacketRx,
                Priority::Normal,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Pool(PoolError::Exhausted)));

        dispatcher.pool().release(held).unwrap();
    }

    #[test]
    fn free_notify_fires_once_after_all_recipients_release() {
        let (clock, dispatcher) = dispatcher_fixture(4);
        let local = dispatcher
            .register_local_delivery(ProcessId(1), EventMask::all(), 4)
            .unwrap();

        let fired = Arc::new(std::sync::atomic::AtomicU64::new(0));
        {
            let fired = fired.clone();
            dispatcher.pool().register_free_notify(
                EventKind::TableChange,
                Arc::new(move |_: &EventRecord| {
                    fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            );
        }

        dispatcher
            .produce(
                SwitchIndex(0),
                EventKind::TableChange,
                Priority::High,
                Bytes::new(),
                Duration::ZERO,
            )
            .unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);

        clock.advance(1);
        let a = dispatcher.global_queue().try_get().unwrap();
        let b = local.try_get().unwrap();
        dispatcher.pool().release(a).unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
        dispatcher.pool().release(b).unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
