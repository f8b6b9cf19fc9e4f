//! Structured logging setup.
//!
//! Log lines carry consistent fields so traffic can be followed across the
//! three contexts:
//! - `context`: page, content-script, background
//! - `kind`: envelope kind
//! - `correlation_id`: request/stream id

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Logging handle returned by [`init_logging`].
pub struct LoggingGuard {
    service_name: String,
}

impl LoggingGuard {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Install the global `tracing` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    if !config.console_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::info!(
        service = %config.full_service_name(),
        json_logs = config.json_logs,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        service_name: config.full_service_name(),
    })
}

/// Log an envelope-related event with standard fields.
///
/// ```rust,ignore
/// log_envelope!(warn, "background", "Dropping late chunk", envelope);
/// ```
#[macro_export]
macro_rules! log_envelope {
    ($level:ident, $context:expr, $msg:expr, $envelope:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            context = $context,
            kind = %$envelope.kind,
            correlation_id = %$envelope.correlation_id,
            $($($field)*,)?
            $msg
        )
    };
}
