//! Retry with exponential backoff and jitter.
//!
//! Only transient failures are retried. The delay before attempt `n`
//! (`n >= 2`) is `min(base * 2^(n-2), max)` plus up to `jitter_ratio` of
//! that value at random.

use crate::classify::Classify;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Longest backoff a validated policy may wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Backoff settings for one kind of remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Quick retry for interactive calls.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter_ratio: 0.3,
        }
    }

    /// A single attempt, never retried.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// Total attempts allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before `attempt` without jitter. Attempt 1 has no delay.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff before `attempt` including random jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if base.is_zero() || ratio.is_nan() || ratio <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=ratio);
        let extra = Duration::try_from_secs_f64(base.as_secs_f64() * jitter).unwrap_or(Duration::MAX);
        base.saturating_add(extra)
    }

    /// True when `max_delay` is within [`MAX_BACKOFF`].
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.max_delay <= MAX_BACKOFF
    }
}

/// Result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Runs `operation`, retrying transient failures according to `policy`.
pub async fn execute<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    execute_with(operation_name, policy, |err: &E| err.is_transient(), operation).await
}

/// Like [`execute`], with a caller-supplied retryability predicate.
pub async fn execute_with<F, Fut, T, E, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "Operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!(operation = operation_name, attempts, error = %err, "Not retrying");
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }
                if attempts >= max_attempts {
                    warn!(operation = operation_name, attempts, error = %err, "Retries exhausted");
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }

                let delay = policy.delay_for_attempt(attempts + 1);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
