//! Consumer worker loops.
//!
//! Each registration owns one worker thread that blocks on its delay queue,
//! hands due events to the consumer, and releases every reference back to the
//! pool. Cancellation is the queue's close signal; there is no side-channel
//! exit flag to poll.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, trace};

use vaxel_core::events::pool::EventPool;
use vaxel_core::events::Event;
use vaxel_core::queue::{DelayQueue, QueueError};

/// Consumer-side event handler.
///
/// The worker retains ownership of the reference; implementations observe the
/// event (and payload via the pool accessors) but never release it themselves.
pub trait EventConsumer: Send {
    fn on_event(&mut self, pool: &EventPool, event: &Event);
}

impl<F> EventConsumer for F
where
    F: FnMut(&EventPool, &Event) + Send,
{
    fn on_event(&mut self, pool: &EventPool, event: &Event) {
        self(pool, event)
    }
}

/// A named thread draining one delay queue until it closes.
///
/// Dropping the worker without calling [`DeliveryWorker::shutdown`] leaves
/// the thread parked on the queue; always shut down through the owning stack.
pub struct DeliveryWorker {
    queue: Arc<DelayQueue>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    pub fn spawn<C>(
        name: &str,
        pool: Arc<EventPool>,
        queue: Arc<DelayQueue>,
        consumer: C,
    ) -> std::io::Result<Self>
    where
        C: EventConsumer + 'static,
    {
        let worker_queue = queue.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(pool, worker_queue, consumer))?;
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> &Arc<DelayQueue> {
        &self.queue
    }

    /// Closes the queue and joins the worker thread.
    pub fn shutdown(mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("delivery worker panicked before joining");
            }
        }
    }
}

fn run<C: EventConsumer>(pool: Arc<EventPool>, queue: Arc<DelayQueue>, mut consumer: C) {
    debug!("delivery worker started");
    let mut processed: u64 = 0;

    loop {
        match queue.get() {
            Ok(event) => {
                processed += 1;
                trace!(event = %event.id(), processed, "delivering event");
                consumer.on_event(&pool, &event);
                if let Err(err) = pool.release(event) {
                    error!(%err, "release after delivery failed");
                }
            }
            Err(QueueError::Closed) => break,
            Err(err) => {
                error!(%err, "delivery worker stopping on unexpected queue state");
                break;
            }
        }
    }

    debug!(processed, "delivery worker exiting");
}
