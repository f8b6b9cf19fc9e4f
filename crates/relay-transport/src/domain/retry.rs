//! # Retry Scheduler
//!
//! Re-sends a request when the receiving context is not ready, using
//! exponential backoff with optional full jitter.
//!
//! ```text
//! attempt 1 ──✗──→ sleep d0 ──→ attempt 2 ──✗──→ sleep d1 ──→ ... ──→ attempt N ──✗──→ RetriesExhausted
//!                                                                          d_k = initial * multiplier^k
//! ```
//!
//! Only transient failures are retried. Anything else is returned to the
//! caller from the attempt that produced it. With `max_attempts = N` the
//! operation is invoked at most N times.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use relay_telemetry::{RETRIES_EXHAUSTED, RETRY_ATTEMPTS};
use relay_types::TransportError;
use tracing::{debug, warn};

/// Randomisation applied to each backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Sleep exactly the computed delay.
    None,
    /// Sleep a uniform random duration in `[0, delay]`.
    Full,
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of sends, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Upper bound on a single delay. `None` leaves delays unbounded.
    pub max_delay: Option<Duration>,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: None,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay before retry number `retry`, with jitter applied.
    pub fn delay_for<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry);
        match self.jitter {
            Jitter::None => base,
            Jitter::Full => {
                let nanos = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
                Duration::from_nanos(rng.gen_range(0..=nanos))
            }
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts.
///
/// `operation` receives the 1-based attempt number. `is_transient` decides
/// which errors are retried.
///
/// # Errors
///
/// - The first non-transient error, unchanged
/// - `TransportError::RetriesExhausted` carrying the last transient error
pub async fn retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_transient: P,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    P: Fn(&TransportError) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !is_transient(&error) => return Err(error),
            Err(error) => error,
        };

        if attempt >= max_attempts {
            RETRIES_EXHAUSTED.inc();
            warn!(attempts = attempt, error = %error, "Retries exhausted");
            return Err(TransportError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = policy.delay_for(attempt - 1, &mut rand::thread_rng());
        RETRY_ATTEMPTS.inc();
        debug!(
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
