//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for logs
    pub service_name: String,

    /// Execution context (page, content-script, background, runtime)
    pub context: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output (for development)
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "cross-context-relay".to_string(),
            context: "runtime".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RELAY_SERVICE_NAME`: Service name (default: cross-context-relay)
    /// - `RELAY_CONTEXT`: Context label (default: runtime)
    /// - `RELAY_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `RELAY_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `RELAY_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("RELAY_SERVICE_NAME")
                .unwrap_or_else(|_| "cross-context-relay".to_string()),

            context: env::var("RELAY_CONTEXT").unwrap_or_else(|_| "runtime".to_string()),

            log_level: env::var("RELAY_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("RELAY_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("RELAY_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        }
    }

    /// Create configuration for a specific execution context.
    pub fn for_context(context: &str) -> Self {
        let mut config = Self::from_env();
        config.context = context.to_string();
        config
    }

    /// Service name qualified by context.
    pub fn full_service_name(&self) -> String {
        if self.context == "runtime" {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.context)
        }
    }
}
