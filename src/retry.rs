//! Startup retries with exponential backoff and jitter
//!
//! Reconciles are retried by the controller runtime. This covers the calls
//! made before the controllers start, such as installing CRDs while the API
//! server is still coming up.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff schedule for a retried operation
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default schedule, stopping after `attempts`
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delays between attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay), move |d| {
            Some(Duration::from_secs_f64(
                (d.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
            ))
        })
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable: std::fmt::Display {
    /// Whether to try again
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::Error {
    fn is_retryable(&self) -> bool {
        crate::Error::is_retryable(self)
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// Each delay is scaled by a random factor in `[0.5, 1.5)`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut delays = config.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_retryable() || config.exhausted(attempt) {
            error!(operation = %operation_name, attempt, error = %e, "giving up");
            return Err(e);
        }

        let delay = delays.next().unwrap_or(config.max_delay);
        let jittered = delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered.as_millis(),
            "retrying"
        );
        tokio::time::sleep(jittered).await;
    }
}
