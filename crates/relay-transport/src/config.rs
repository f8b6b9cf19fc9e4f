//! # Relay Configuration
//!
//! Tunables for the transport, with defaults and environment overrides.
//!
//! | Variable | Default | Field |
//! |----------|---------|-------|
//! | `RELAY_ORIGIN` | `chrome-extension://relay` | `origin` |
//! | `RELAY_RETRY_MAX_ATTEMPTS` | `10` | `retry.max_attempts` |
//! | `RELAY_RETRY_INITIAL_DELAY_MS` | `100` | `retry.initial_delay_ms` |
//! | `RELAY_RETRY_MULTIPLIER` | `2.0` | `retry.multiplier` |
//! | `RELAY_RETRY_MAX_DELAY_MS` | unset | `retry.max_delay_ms` |
//! | `RELAY_RETRY_JITTER` | `true` | `retry.jitter` |
//! | `RELAY_STREAM_IDLE_TIMEOUT_MS` | `20000` (`0` disables) | `stream.idle_timeout_ms` |
//! | `RELAY_CLOSED_RETENTION_SECS` | `60` | `stream.closed_retention_secs` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use relay_types::{ChannelLabel, ChannelName};
use thiserror::Error;

use crate::domain::{Jitter, RetryPolicy};

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Retry max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("Retry multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("Invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    /// Origin written into channel names opened by this context.
    pub origin: RelayOrigin,
    pub retry: RetryConfig,
    pub stream: StreamConfig,
}

/// Origin newtype so the default lives in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOrigin(pub String);

impl Default for RelayOrigin {
    fn default() -> Self {
        Self("chrome-extension://relay".to_string())
    }
}

impl RelayOrigin {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Retry scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: None,
            jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            jitter: if self.jitter { Jitter::Full } else { Jitter::None },
        }
    }
}

/// Stream configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Abort a server stream when no item arrives for this long. 0 disables.
    pub idle_timeout_ms: u64,
    /// How long closed ids are remembered for late-envelope detection.
    pub closed_retention_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 20_000,
            closed_retention_secs: 60,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    #[must_use]
    pub fn closed_retention(&self) -> Duration {
        Duration::from_secs(self.closed_retention_secs)
    }
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    ///
    /// # Errors
    ///
    /// `InvalidEnv` if a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(origin) = env::var("RELAY_ORIGIN") {
            config.origin = RelayOrigin(origin);
        }
        if let Some(v) = parse_env("RELAY_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_env("RELAY_RETRY_INITIAL_DELAY_MS")? {
            config.retry.initial_delay_ms = v;
        }
        if let Some(v) = parse_env("RELAY_RETRY_MULTIPLIER")? {
            config.retry.multiplier = v;
        }
        if let Some(v) = parse_env("RELAY_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = Some(v);
        }
        if let Some(v) = parse_env("RELAY_RETRY_JITTER")? {
            config.retry.jitter = v;
        }
        if let Some(v) = parse_env("RELAY_STREAM_IDLE_TIMEOUT_MS")? {
            config.stream.idle_timeout_ms = v;
        }
        if let Some(v) = parse_env("RELAY_CLOSED_RETENTION_SECS")? {
            config.stream.closed_retention_secs = v;
        }

        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - `retry.max_attempts` is zero
    /// - `retry.multiplier` is below 1.0 or not finite
    /// - `origin` is not a valid `scheme://host` origin
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.retry.multiplier));
        }
        ChannelName::new(ChannelLabel::Extension, self.origin.as_str(), None).map_err(|e| {
            ConfigError::InvalidOrigin {
                origin: self.origin.0.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}

/// Parse `var` if set. Unset is `Ok(None)`, unparsable is `InvalidEnv`.
pub fn parse_env<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
