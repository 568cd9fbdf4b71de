//! Core resource budgets.
//!
//! Pool and queue capacities are fixed at construction time; persistent
//! exhaustion under load is a capacity planning signal, so these are the
//! numbers operators actually tune.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Core system configuration parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CoreConfig {
    /// Event pool sizing (payload slot arena).
    #[validate(nested)]
    pub event_pool: PoolConfig,

    /// Stack-wide global delay queue sizing.
    #[validate(nested)]
    pub global_queue: QueueConfig,

    /// Number of switch units this stack manages.
    #[validate(range(min = 1, max = 16))]
    #[serde(default = "default_switch_count")]
    pub switch_count: u16,
}

/// Event pool configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PoolConfig {
    /// Number of pre-allocated event payload slots.
    #[validate(range(min = 4, max = 65536))]
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,
}

/// Delay queue configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct QueueConfig {
    /// Maximum number of events the queue holds before `add` is rejected.
    #[validate(range(min = 2, max = 65536))]
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_switch_count() -> u16 {
    1
}

fn default_pool_capacity() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            event_pool: PoolConfig::default(),
            global_queue: QueueConfig::default(),
            switch_count: default_switch_count(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}
