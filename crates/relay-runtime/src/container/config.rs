//! # Runtime Configuration
//!
//! Unified configuration for the relay, telemetry and the demo run.
//!
//! ## Environment Overrides
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RELAY_DEMO_COUNT` | `5` | Items requested from the counter service |
//! | `RELAY_DEMO_REPORT_INTERVAL_SECS` | `5` | Status log interval |
//! | `RELAY_DEMO_PRINT_METRICS` | `false` | Dump Prometheus text on exit |
//! | `RELAY_ALLOWED_ORIGINS` | relay origin | Comma-separated approved origins |
//!
//! Relay and telemetry sections read their own variables, see
//! [`RelayConfig::from_env`] and [`TelemetryConfig::from_env`].

use std::env;
use std::time::Duration;

use relay_telemetry::TelemetryConfig;
use relay_transport::config::parse_env;
use relay_transport::{ConfigError, RelayConfig};
use thiserror::Error;

/// Largest count the counter service will stream.
pub const MAX_DEMO_COUNT: u64 = 1_000;

/// Runtime configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum RuntimeConfigError {
    #[error(transparent)]
    Relay(#[from] ConfigError),

    #[error("Demo count {0} exceeds the maximum of {MAX_DEMO_COUNT}")]
    CountTooLarge(u64),

    #[error("Report interval must be at least one second")]
    ZeroReportInterval,

    #[error("At least one origin must be approved")]
    NoAllowedOrigins,
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub relay: RelayConfig,
    pub telemetry: TelemetryConfig,
    pub demo: DemoConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let relay = RelayConfig::default();
        let demo = DemoConfig::for_origin(relay.origin.as_str());
        Self {
            relay,
            telemetry: TelemetryConfig::for_context("runtime"),
            demo,
        }
    }
}

impl RuntimeConfig {
    /// Load every section from the environment and validate the result.
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        let relay = RelayConfig::from_env()?;
        let demo = DemoConfig::from_env(relay.origin.as_str())?;
        let config = Self {
            relay,
            telemetry: TelemetryConfig::from_env(),
            demo,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.relay.validate()?;
        self.demo.validate()
    }
}

/// Settings for the demo run.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    /// Items requested from the counter service.
    pub count: u64,
    /// Interval between status log lines.
    pub report_interval_secs: u64,
    /// Dump Prometheus text when the run ends.
    pub print_metrics: bool,
    /// Origins the background approves.
    pub allowed_origins: Vec<String>,
}

impl DemoConfig {
    /// Defaults approving only `origin`.
    #[must_use]
    pub fn for_origin(origin: &str) -> Self {
        Self {
            count: 5,
            report_interval_secs: 5,
            print_metrics: false,
            allowed_origins: vec![origin.to_string()],
        }
    }

    fn from_env(origin: &str) -> Result<Self, RuntimeConfigError> {
        let mut demo = Self::for_origin(origin);
        if let Some(count) = parse_env("RELAY_DEMO_COUNT")? {
            demo.count = count;
        }
        if let Some(secs) = parse_env("RELAY_DEMO_REPORT_INTERVAL_SECS")? {
            demo.report_interval_secs = secs;
        }
        if let Some(print) = parse_env("RELAY_DEMO_PRINT_METRICS")? {
            demo.print_metrics = print;
        }
        if let Ok(origins) = env::var("RELAY_ALLOWED_ORIGINS") {
            demo.allowed_origins = split_origins(&origins);
        }
        Ok(demo)
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        if self.count > MAX_DEMO_COUNT {
            return Err(RuntimeConfigError::CountTooLarge(self.count));
        }
        if self.report_interval_secs == 0 {
            return Err(RuntimeConfigError::ZeroReportInterval);
        }
        if self.allowed_origins.is_empty() {
            return Err(RuntimeConfigError::NoAllowedOrigins);
        }
        Ok(())
    }

    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
