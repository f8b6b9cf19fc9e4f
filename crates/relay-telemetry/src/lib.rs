//! # Relay Telemetry
//!
//! Observability for the relay contexts.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters/gauges for envelope traffic, retries and drops
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::for_context("background");
//! let _guard = init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RELAY_SERVICE_NAME` | `cross-context-relay` | Service name in logs |
//! | `RELAY_CONTEXT` | `runtime` | Execution context label |
//! | `RELAY_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `RELAY_CONSOLE_OUTPUT` | `true` | Emit logs to stdout |
//! | `RELAY_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, CALL_DURATION,
    CHANNELS_ATTACHED, ENVELOPES_DROPPED, ENVELOPES_RECEIVED, ENVELOPES_SENT, PENDING_REJECTED,
    RETRIES_EXHAUSTED, RETRY_ATTEMPTS, SESSIONS_ACTIVE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let logging = init_logging(config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
