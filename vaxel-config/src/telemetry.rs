//! Observability configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Whether Prometheus metrics collection is wired into the stack.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            metrics_enabled: true,
        }
    }
}
