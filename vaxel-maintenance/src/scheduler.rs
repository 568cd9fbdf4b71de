//! MAC-table maintenance scheduling.
//!
//! One worker thread multiplexes two producers over a bounded signal channel:
//! the periodic aging sweep (channel receive timing out at the aging
//! interval) and the hardware table-change notification (a message on the
//! channel). Both synthesize events through the dispatcher rather than
//! touching table state, so table maintenance keeps a single serialized entry
//! point.
//!
//! The notification side is interrupt-reachable and therefore never blocks:
//! a full channel drops the signal and counts it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{error, info, trace, warn};

use vaxel_core::events::pool::FreeNotify;
use vaxel_core::events::{EventKind, EventRecord, Priority, SwitchIndex};
use vaxel_dispatch::Dispatcher;

/// Hardware seam: re-arms the table-change notification source after the
/// event synthesized for it has been fully consumed and released.
pub trait NotifySource: Send + Sync {
    fn rearm(&self, switch: SwitchIndex);
}

enum Signal {
    TableChange(SwitchIndex),
    Shutdown,
}

struct SchedulerShared {
    interval: Mutex<Duration>,
}

/// Cheap clonable handle for the interrupt layer to signal a table-change
/// condition. `notify` never blocks.
#[derive(Clone)]
pub struct TableNotifyHandle {
    tx: Sender<Signal>,
    dropped: Arc<AtomicU64>,
}

impl TableNotifyHandle {
    /// Queues a table-change signal. Returns `false` when the signal was
    /// dropped (channel full or scheduler gone); the drop is counted.
    pub fn notify(&self, switch: SwitchIndex) -> bool {
        match self.tx.try_send(Signal::TableChange(switch)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Signals dropped so far because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Periodic aging sweeps plus interrupt-triggered table-change events.
pub struct AgingScheduler {
    shared: Arc<SchedulerShared>,
    signal_tx: Sender<Signal>,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl AgingScheduler {
    /// Starts the scheduler thread. When a `NotifySource` is given, a
    /// free-notify listener re-arms it each time a table-change event is
    /// fully released.
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        switches: Vec<SwitchIndex>,
        interval: Duration,
        channel_capacity: usize,
        notify_source: Option<Arc<dyn NotifySource>>,
    ) -> std::io::Result<Self> {
        let (signal_tx, signal_rx) = bounded(channel_capacity);
        let shared = Arc::new(SchedulerShared {
            interval: Mutex::new(interval),
        });

        if let Some(source) = notify_source {
            dispatcher
                .pool()
                .register_free_notify(EventKind::TableChange, Arc::new(RearmOnFree { source }));
        }

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("vaxel-aging".to_string())
            .spawn(move || run(dispatcher, switches, worker_shared, signal_rx))?;

        Ok(Self {
            shared,
            signal_tx,
            dropped: Arc::new(AtomicU64::new(0)),
            handle: Some(handle),
        })
    }

    /// Current aging-timer value.
    pub fn aging_interval(&self) -> Duration {
        *self.shared.interval.lock()
    }

    /// Replaces the aging interval. Takes effect at the next wake.
    pub fn set_aging_interval(&self, interval: Duration) {
        *self.shared.interval.lock() = interval;
    }

    /// Handle for the interrupt layer.
    pub fn table_notify(&self) -> TableNotifyHandle {
        TableNotifyHandle {
            tx: self.signal_tx.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Stops the scheduler thread and joins it.
    pub fn shutdown(mut self) {
        let _ = self.signal_tx.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("aging scheduler panicked before joining");
            }
        }
    }
}

fn run(
    dispatcher: Arc<Dispatcher>,
    switches: Vec<SwitchIndex>,
    shared: Arc<SchedulerShared>,
    signal_rx: Receiver<Signal>,
) {
    info!(switches = switches.len(), "aging scheduler started");

    loop {
        let interval = *shared.interval.lock();
        match signal_rx.recv_timeout(interval) {
            Ok(Signal::TableChange(switch)) => {
                trace!(%switch, "table-change notification received");
                match dispatcher.produce(
                    switch,
                    EventKind::TableChange,
                    Priority::High,
                    Bytes::new(),
                    Duration::ZERO,
                ) {
                    Ok(report) if report.is_partial() => {
                        warn!(%switch, "table-change event partially delivered")
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%switch, %err, "table-change event dropped"),
                }
            }
            Ok(Signal::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {
                for switch in &switches {
                    match dispatcher.produce(
                        *switch,
                        EventKind::MacAging,
                        Priority::Normal,
                        Bytes::new(),
                        Duration::ZERO,
                    ) {
                        Ok(report) if report.is_partial() => {
                            warn!(%switch, "aging sweep partially delivered")
                        }
                        Ok(_) => trace!(%switch, "aging sweep scheduled"),
                        Err(err) => warn!(%switch, %err, "aging sweep skipped this tick"),
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("aging scheduler stopped");
}

struct RearmOnFree {
    source: Arc<dyn NotifySource>,
}

impl FreeNotify for RearmOnFree {
    fn on_free(&self, record: &EventRecord) {
        self.source.rearm(record.meta.switch);
    }
}
