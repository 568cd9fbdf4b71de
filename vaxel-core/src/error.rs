use thiserror::Error;

use crate::events::pool::PoolError;
use crate::queue::QueueError;

/// Unified error for callers that mix pool and queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("event pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("delay queue error: {0}")]
    Queue(#[from] QueueError),
}
