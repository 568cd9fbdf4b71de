//! MAC-table maintenance configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Aging scheduler configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MaintenanceConfig {
    /// Interval between aging sweeps, in milliseconds.
    #[validate(range(min = 10, max = 3_600_000))]
    pub aging_interval_ms: u64,

    /// Depth of the bounded table-change notification channel. Signals
    /// arriving while the channel is full are counted and dropped.
    #[validate(range(min = 1, max = 4096))]
    pub notify_channel_capacity: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            aging_interval_ms: 10_000,
            notify_channel_capacity: 64,
        }
    }
}

impl MaintenanceConfig {
    /// Aging interval as a `Duration`.
    pub fn aging_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.aging_interval_ms)
    }
}
