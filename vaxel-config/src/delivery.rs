//! Local delivery configuration.
//!
//! Sizing and naming for the per-process consumer registrations.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Local delivery configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct DeliveryConfig {
    /// Capacity of each per-process delay queue.
    #[validate(range(min = 2, max = 65536))]
    pub local_queue_capacity: usize,

    /// Upper bound on simultaneous local delivery registrations.
    #[validate(range(min = 1, max = 256))]
    pub max_registrations: usize,

    /// Prefix for consumer worker thread names (a numeric suffix is added).
    #[validate(custom(function = validation::validate_thread_prefix))]
    pub worker_name_prefix: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            local_queue_capacity: 128,
            max_registrations: 32,
            worker_name_prefix: "vaxel-local".into(),
        }
    }
}
