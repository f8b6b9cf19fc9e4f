//! Prometheus metrics for the relay.
//!
//! All metrics follow the naming convention: `relay_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., envelopes_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., channels_attached)
//! - **Histogram**: Distribution of values (e.g., call_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // ENVELOPE TRAFFIC
    // =========================================================================

    /// Envelopes posted to a channel, by kind
    pub static ref ENVELOPES_SENT: CounterVec = CounterVec::new(
        Opts::new("relay_envelopes_sent_total", "Envelopes posted to a channel"),
        &["kind"]
    ).expect("metric creation failed");

    /// Envelopes decoded from a channel, by kind
    pub static ref ENVELOPES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("relay_envelopes_received_total", "Envelopes decoded from a channel"),
        &["kind"]
    ).expect("metric creation failed");

    /// Envelopes dropped before delivery
    pub static ref ENVELOPES_DROPPED: CounterVec = CounterVec::new(
        Opts::new("relay_envelopes_dropped_total", "Envelopes dropped before delivery"),
        &["reason"]  // reason: malformed/unexpected/late/unknown/collision/unauthorized
    ).expect("metric creation failed");

    // =========================================================================
    // RETRY SCHEDULER
    // =========================================================================

    /// Retries performed after a transient failure
    pub static ref RETRY_ATTEMPTS: Counter = Counter::new(
        "relay_retry_attempts_total",
        "Retries performed after a transient failure"
    ).expect("metric creation failed");

    /// Calls that ran out of attempts
    pub static ref RETRIES_EXHAUSTED: Counter = Counter::new(
        "relay_retries_exhausted_total",
        "Calls that ran out of retry attempts"
    ).expect("metric creation failed");

    // =========================================================================
    // CHANNELS AND SESSIONS
    // =========================================================================

    /// Live channels held by relay clients
    pub static ref CHANNELS_ATTACHED: Gauge = Gauge::new(
        "relay_channels_attached",
        "Live channels held by relay clients"
    ).expect("metric creation failed");

    /// Pending requests rejected because their channel closed
    pub static ref PENDING_REJECTED: Counter = Counter::new(
        "relay_pending_rejected_total",
        "Pending requests rejected because their channel closed"
    ).expect("metric creation failed");

    /// Approved sessions held by session managers
    pub static ref SESSIONS_ACTIVE: Gauge = Gauge::new(
        "relay_sessions_active",
        "Sessions held by session managers"
    ).expect("metric creation failed");

    /// Unary call duration, from first send attempt to terminal envelope
    pub static ref CALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "relay_call_duration_seconds",
            "Unary call duration including retries"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("bucket creation failed"))
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Traffic
        Box::new(ENVELOPES_SENT.clone()),
        Box::new(ENVELOPES_RECEIVED.clone()),
        Box::new(ENVELOPES_DROPPED.clone()),
        // Retry
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(RETRIES_EXHAUSTED.clone()),
        // Channels
        Box::new(CHANNELS_ATTACHED.clone()),
        Box::new(PENDING_REJECTED.clone()),
        Box::new(SESSIONS_ACTIVE.clone()),
        Box::new(CALL_DURATION.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
