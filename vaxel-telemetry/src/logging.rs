//! ## vaxel-telemetry::logging
//! **Structured logging for the event notification core**
//!
//! ### Components:
//! - `metrics/`: Prometheus counters and histograms
//! - `logging/`: `tracing` subscriber setup plus structured event records
//!
//! Logging runs on whichever thread produced or consumed the event, so every
//! emit path here is synchronous and non-blocking.

use once_cell::sync::OnceCell;
use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

static SUBSCRIBER_INIT: OnceCell<()> = OnceCell::new();

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Install the global fmt subscriber. Safe to call more than once; only
    /// the first call installs anything.
    pub fn init() {
        Self::init_with_filter("info");
    }

    /// Like [`EventLogger::init`], with `filter` as the fallback directive
    /// when `RUST_LOG` is unset.
    pub fn init_with_filter(filter: &str) {
        SUBSCRIBER_INIT.get_or_init(|| {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
                )
                .with_thread_names(true)
                .with_span_events(FmtSpan::ENTER)
                .init()
        });
    }

    /// Emit a structured stack event record.
    #[inline]
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "stack_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        span.in_scope(|| {
            tracing::info!(
                metadata = ?metadata,
                "Stack event recorded"
            );
        });
    }
}
