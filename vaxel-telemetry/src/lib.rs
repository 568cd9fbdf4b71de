//! # Vaxel Telemetry and Monitoring
//!
//! Crate for logging and metrics functionalities of the event stack.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
