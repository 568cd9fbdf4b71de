//! ## vaxel-telemetry::metrics
//! **Prometheus counters and histograms for the event stack**
//!
//! ### Components:
//! - `metrics/`: Prometheus counters and histograms
//! - `logging/`: `tracing` subscriber setup plus structured event records

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub events_allocated: prometheus::Counter,
    pub events_released: prometheus::Counter,
    pub pool_exhausted: prometheus::Counter,
    pub events_dispatched: prometheus::Counter,
    pub events_overridden: prometheus::Counter,
    pub events_rejected: prometheus::Counter,
    pub delivery_latency: prometheus::Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let events_allocated =
            Counter::new("vaxel_events_allocated_total", "Events taken from the pool").unwrap();
        let events_released =
            Counter::new("vaxel_events_released_total", "Events returned to the pool").unwrap();
        let pool_exhausted = Counter::new(
            "vaxel_pool_exhausted_total",
            "Allocations rejected because the pool was empty",
        )
        .unwrap();
        let events_dispatched = Counter::new(
            "vaxel_events_dispatched_total",
            "Events routed through the default delivery path",
        )
        .unwrap();
        let events_overridden = Counter::new(
            "vaxel_events_overridden_total",
            "Events consumed by a per-switch override handler",
        )
        .unwrap();
        let events_rejected = Counter::new(
            "vaxel_events_rejected_total",
            "Queue postings dropped because a delay queue was full",
        )
        .unwrap();

        let delivery_latency = Histogram::with_opts(
            HistogramOpts::new(
                "vaxel_delivery_latency_ns",
                "Time between an event falling due and its delivery",
            )
            .buckets(vec![1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
        )
        .unwrap();

        registry
            .register(Box::new(events_allocated.clone()))
            .unwrap();
        registry.register(Box::new(events_released.clone())).unwrap();
        registry.register(Box::new(pool_exhausted.clone())).unwrap();
        registry
            .register(Box::new(events_dispatched.clone()))
            .unwrap();
        registry
            .register(Box::new(events_overridden.clone()))
            .unwrap();
        registry.register(Box::new(events_rejected.clone())).unwrap();
        registry
            .register(Box::new(delivery_latency.clone()))
            .unwrap();

        Self {
            registry,
            events_allocated,
            events_released,
            pool_exhausted,
            events_dispatched,
            events_overridden,
            events_rejected,
            delivery_latency,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap())
    }
}
