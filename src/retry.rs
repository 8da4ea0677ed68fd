//! Bounded retries for failing calls.
//!
//! [`with_retry`] is shared by the cache preload workers and the host
//! monitor notification. By default only errors classified as transient by
//! [`KubegateError::is_transient()`] are retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{KubegateError, Result};

/// How often and how patiently [`with_retry`] re-runs a failing call.
///
/// ```rust
/// # use kubegate::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total calls, the first one included. Default: 3.
    pub max_attempts: u32,
    /// Wait before the second call. Default: 500ms.
    pub initial_delay: Duration,
    /// Upper bound on any single wait. Default: 30s.
    pub max_delay: Duration,
    /// Retry permanent errors too. Default: false.
    pub retry_all: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            retry_all: false,
        }
    }
}

impl RetryConfig {
    /// Three attempts, exponential from 500ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed backoff: every retry waits `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            retry_all: false,
        }
    }

    /// A single call, no retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Retry every error, not only transient ones. For best-effort work
    /// where a cluster may briefly answer with permanent-looking errors.
    pub fn retry_all(mut self, enabled: bool) -> Self {
        self.retry_all = enabled;
        self
    }

    fn should_retry(&self, err: &KubegateError) -> bool {
        self.retry_all || err.is_transient()
    }

    /// Wait after the `retry`-th failure (0-indexed): the initial delay
    /// doubled per retry, never above `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or runs out of attempts.
///
/// Permanent errors end the loop unless [`RetryConfig::retry_all`] is set.
/// The last error is returned once `config.max_attempts` calls have
/// failed. `operation` labels the log line and the retry counter.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if config.max_attempts == 0 {
        return Err(KubegateError::Configuration(format!(
            "{operation}: retry attempts must be at least 1"
        )));
    }

    let mut attempt = 0;
    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if !config.should_retry(&err) || attempt >= config.max_attempts {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
            .increment(1);
        warn!(
            operation,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
