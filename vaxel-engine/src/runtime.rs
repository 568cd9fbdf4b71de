//! Stack runtime: builds and tears down the whole event core.
//!
//! Construction order: clock, metrics, pool, global queue, dispatcher, global
//! worker, aging scheduler. Teardown runs strictly in reverse of the data
//! flow: producers stop first (scheduler), then local consumers, then the
//! global consumer, and finally every still-queued reference is drained back
//! into the pool. [`SwitchStack::shutdown`] is the documented teardown path;
//! dropping the stack performs the same steps.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use vaxel_config::VaxelConfig;
use vaxel_core::events::pool::EventPool;
use vaxel_core::events::{EventMask, SwitchIndex};
use vaxel_core::queue::DelayQueue;
use vaxel_core::time::{MonotonicClock, SharedClock};
use vaxel_dispatch::{DeliveryWorker, Dispatcher, EventConsumer, ProcessId};
use vaxel_maintenance::{AgingScheduler, NotifySource, TableNotifyHandle};
use vaxel_telemetry::{EventLogger, MetricsRecorder};

use crate::error::EngineError;

/// The explicitly constructed, explicitly torn-down event notification stack.
pub struct SwitchStack {
    config: VaxelConfig,
    metrics: Arc<MetricsRecorder>,
    pool: Arc<EventPool>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Option<AgingScheduler>,
    global_worker: Option<DeliveryWorker>,
    local_workers: Mutex<Vec<(ProcessId, DeliveryWorker)>>,
    shut: bool,
}

impl std::fmt::Debug for SwitchStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchStack")
            .field("shut", &self.shut)
            .finish_non_exhaustive()
    }
}

impl SwitchStack {
    /// Builds and starts the stack.
    ///
    /// `global_consumer` drains the stack-wide queue; `notify_source`, when
    /// given, is re-armed after each consumed table-change event.
    pub fn new<C>(
        config: VaxelConfig,
        global_consumer: C,
        notify_source: Option<Arc<dyn NotifySource>>,
    ) -> Result<Self, EngineError>
    where
        C: EventConsumer + 'static,
    {
        config.ensure_valid()?;
        EventLogger::init_with_filter(&config.telemetry.log_filter);
        info!("initializing switch stack");
        debug!("core config: {:?}", config.core);

        let clock: SharedClock = Arc::new(MonotonicClock::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let pool = if config.telemetry.metrics_enabled {
            Arc::new(EventPool::with_metrics(
                config.core.event_pool.capacity,
                clock.clone(),
                metrics.clone(),
            ))
        } else {
            Arc::new(EventPool::new(config.core.event_pool.capacity, clock.clone()))
        };
        let global_queue = if config.telemetry.metrics_enabled {
            Arc::new(DelayQueue::with_metrics(
                config.core.global_queue.capacity,
                clock.clone(),
                metrics.clone(),
            ))
        } else {
            Arc::new(DelayQueue::new(
                config.core.global_queue.capacity,
                clock.clone(),
            ))
        };
        let mut dispatcher = Dispatcher::new(
            pool.clone(),
            global_queue.clone(),
            clock,
            config.delivery.max_registrations,
        );
        if config.telemetry.metrics_enabled {
            dispatcher = dispatcher.with_metrics(metrics.clone());
        }
        let dispatcher = Arc::new(dispatcher);

        let global_worker =
            DeliveryWorker::spawn("vaxel-global", pool.clone(), global_queue, global_consumer)?;

        let switches: Vec<SwitchIndex> = (0..config.core.switch_count).map(SwitchIndex).collect();
        let scheduler = AgingScheduler::spawn(
            dispatcher.clone(),
            switches,
            config.maintenance.aging_interval(),
            config.maintenance.notify_channel_capacity,
            notify_source,
        )?;

        EventLogger::log_event(
            "stack_started",
            vec![
                KeyValue::new("pool_capacity", config.core.event_pool.capacity as i64),
                KeyValue::new("switch_count", config.core.switch_count as i64),
            ],
        );

        Ok(Self {
            config,
            metrics,
            pool,
            dispatcher,
            scheduler: Some(scheduler),
            global_worker: Some(global_worker),
            local_workers: Mutex::new(Vec::new()),
            shut: false,
        })
    }

    /// Registers a per-process consumer and starts its worker thread.
    /// Returns the process's delay queue handle.
    pub fn register_local_delivery<C>(
        &self,
        process: ProcessId,
        mask: EventMask,
        consumer: C,
    ) -> Result<Arc<DelayQueue>, EngineError>
    where
        C: EventConsumer + 'static,
    {
        let queue = self.dispatcher.register_local_delivery(
            process,
            mask,
            self.config.delivery.local_queue_capacity,
        )?;

        let name = format!("{}{}", self.config.delivery.worker_name_prefix, process.0);
        let worker = match DeliveryWorker::spawn(&name, self.pool.clone(), queue.clone(), consumer)
        {
            Ok(worker) => worker,
            Err(err) => {
                let _ = self.dispatcher.deregister_local_delivery(process);
                return Err(err.into());
            }
        };

        self.local_workers.lock().push((process, worker));
        info!(%process, "local delivery registered");
        Ok(queue)
    }

    /// Detaches a process: stops its worker, drains its queue, and frees the
    /// registration. Returns `false` if the process was not registered.
    pub fn deregister_local_delivery(&self, process: ProcessId) -> bool {
        let Some(entry) = self.dispatcher.deregister_local_delivery(process) else {
            return false;
        };
        entry.queue.close();

        let worker = {
            let mut workers = self.local_workers.lock();
            workers
                .iter()
                .position(|(owner, _)| *owner == process)
                .map(|pos| workers.remove(pos).1)
        };
        if let Some(worker) = worker {
            worker.shutdown();
        }
        self.release_drained(&entry.queue);
        info!(%process, "local delivery deregistered");
        true
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Handle the interrupt layer uses to signal table-change conditions.
    pub fn table_notify(&self) -> Option<TableNotifyHandle> {
        self.scheduler.as_ref().map(AgingScheduler::table_notify)
    }

    /// Current aging-timer value.
    pub fn aging_interval(&self) -> Option<Duration> {
        self.scheduler.as_ref().map(AgingScheduler::aging_interval)
    }

    pub fn set_aging_interval(&self, interval: Duration) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.set_aging_interval(interval);
        }
    }

    /// Tears the stack down in order. Idempotent; also runs on drop.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shut {
            return;
        }
        self.shut = true;
        info!("switch stack shutting down");

        // Producers first: no new events once the scheduler is gone.
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }

        // Local consumers next, each draining its remaining references.
        let workers: Vec<_> = self.local_workers.lock().drain(..).collect();
        for (process, worker) in workers {
            debug!(%process, "stopping local delivery worker");
            let queue = worker.queue().clone();
            worker.shutdown();
            self.release_drained(&queue);
            let _ = self.dispatcher.deregister_local_delivery(process);
        }

        // Global consumer last.
        if let Some(worker) = self.global_worker.take() {
            let queue = worker.queue().clone();
            worker.shutdown();
            self.release_drained(&queue);
        }

        EventLogger::log_event(
            "stack_stopped",
            vec![KeyValue::new("still_allocated", self.pool.allocated() as i64)],
        );
        info!(
            still_allocated = self.pool.allocated(),
            "switch stack shut down"
        );
    }

    fn release_drained(&self, queue: &DelayQueue) {
        for event in queue.drain() {
            if let Err(err) = self.pool.release(event) {
                error!(%err, "failed to release drained event");
            }
        }
    }
}

impl Drop for SwitchStack {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
