//! Per call-site circuit breaker.
//!
//! States:
//! - Closed: calls pass through; consecutive failures are counted
//! - Open: calls fail fast without invoking the operation
//! - HalfOpen: the recovery timeout elapsed; the next call is a trial
//!
//! Every failed call counts toward opening and a success resets the counter.
//! With `transient_only` set, non-transient failures (4xx, conflict, auth)
//! reset the counter instead of adding to it.
//!
//! A secondary guard watches the last `timeout_sample_size` outcomes. When
//! timeouts make up at least `timeout_rate_threshold` of a full sample, all
//! calls are suppressed for `suppression_period` and the sample is cleared.

use crate::classify::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// Calls are suppressed after a run of timeouts.
    #[error("calls suppressed after repeated timeouts")]
    Suppressed,

    /// The underlying operation failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call without running it.
    #[must_use]
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::Rejected | Self::Suppressed)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for CircuitError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Inner(e) => e.class(),
            Self::Rejected | Self::Suppressed => ErrorClass::Transient,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, Self::Inner(e) if e.is_timeout())
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Count only transient failures; any other outcome resets the counter.
    pub transient_only: bool,
    /// How long the circuit stays open before a trial call.
    #[serde(with = "crate::serde_millis")]
    pub recovery_timeout: Duration,
    /// Number of recent outcomes the timeout guard looks at.
    pub timeout_sample_size: usize,
    /// Fraction of timeouts in a full sample that triggers suppression.
    pub timeout_rate_threshold: f64,
    #[serde(with = "crate::serde_millis")]
    pub suppression_period: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            transient_only: false,
            recovery_timeout: Duration::from_secs(30),
            timeout_sample_size: 20,
            timeout_rate_threshold: 0.9,
            suppression_period: Duration::from_secs(300),
        }
    }
}

impl CircuitConfig {
    /// Trips faster and waits longer before trying again.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Tolerates more failures and recovers sooner.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_transient_only(mut self, transient_only: bool) -> Self {
        self.transient_only = transient_only;
        self
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_recovery_timeout(mut self, recovery_timeout: Duration) -> Self {
        self.recovery_timeout = recovery_timeout;
        self
    }

    #[must_use]
    pub fn with_timeout_guard(
        mut self,
        sample_size: usize,
        rate_threshold: f64,
        suppression_period: Duration,
    ) -> Self {
        self.timeout_sample_size = sample_size;
        self.timeout_rate_threshold = rate_threshold;
        self.suppression_period = suppression_period;
        self
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub suppressed_until: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<Instant>,
    timeout_sample: VecDeque<bool>,
    suppressed_until: Option<Instant>,
}

enum Admission {
    Allowed,
    Rejected,
    Suppressed,
}

/// A named circuit breaker with metrics tracking
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_time: None,
                timeout_sample: VecDeque::with_capacity(config.timeout_sample_size),
                suppressed_until: None,
            }),
            config,
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open circuit whose recovery timeout has elapsed
    /// reports `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        self.effective_state(&inner, Instant::now())
    }

    fn effective_state(&self, inner: &Inner, now: Instant) -> CircuitState {
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) if now >= opened + self.config.recovery_timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        let state = self.effective_state(&inner, Instant::now());
        CircuitBreakerState {
            state,
            is_open: state == CircuitState::Open,
            failure_count: inner.consecutive_failures,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            suppressed_until: inner.suppressed_until,
        }
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// The closure is only invoked when the breaker admits the call.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.admit() {
            Admission::Allowed => {}
            Admission::Rejected => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                return Err(CircuitError::Rejected);
            }
            Admission::Suppressed => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker suppressed call (timeouts)");
                return Err(CircuitError::Suppressed);
            }
        }

        match f().await {
            Ok(value) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.record(None);
                debug!(circuit = %self.name, "Circuit call succeeded");
                Ok(value)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.record(Some((err.class(), err.is_timeout())));
                debug!(circuit = %self.name, class = %err.class(), "Circuit call failed");
                Err(CircuitError::Inner(err))
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        let now = Instant::now();

        if let Some(until) = inner.suppressed_until {
            if now < until {
                return Admission::Suppressed;
            }
            info!(circuit = %self.name, "Timeout suppression lifted");
            inner.suppressed_until = None;
            inner.timeout_sample.clear();
        }

        match self.effective_state(&inner, now) {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen => {
                if inner.state == CircuitState::Open {
                    info!(circuit = %self.name, "Recovery timeout elapsed, trying a call");
                    inner.state = CircuitState::HalfOpen;
                }
                Admission::Allowed
            }
        }
    }

    /// Records an outcome. `None` is a success; `Some((class, timed_out))` a failure.
    fn record(&self, failure: Option<(ErrorClass, bool)>) {
        let mut inner = self.lock();
        let now = Instant::now();

        self.sample_timeout(&mut inner, now, failure.is_some_and(|(_, timed_out)| timed_out));

        let counted = failure.is_some_and(|(class, _)| {
            !self.config.transient_only || matches!(class, ErrorClass::Transient)
        });

        if counted {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.last_failure_time = Some(now);
            let should_open = inner.state == CircuitState::HalfOpen
                || inner.consecutive_failures >= self.config.failure_threshold;
            if should_open && inner.state != CircuitState::Open {
                warn!(
                    circuit = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            if should_open {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
            }
        } else {
            if inner.state != CircuitState::Closed {
                info!(circuit = %self.name, "Circuit breaker closed");
            }
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
        }
    }

    fn sample_timeout(&self, inner: &mut Inner, now: Instant, timed_out: bool) {
        let size = self.config.timeout_sample_size;
        if size == 0 {
            return;
        }
        inner.timeout_sample.push_back(timed_out);
        while inner.timeout_sample.len() > size {
            inner.timeout_sample.pop_front();
        }
        if inner.timeout_sample.len() < size {
            return;
        }
        let timeouts = inner.timeout_sample.iter().filter(|t| **t).count();
        let rate = timeouts as f64 / size as f64;
        if rate >= self.config.timeout_rate_threshold {
            warn!(
                circuit = %self.name,
                timeouts,
                sample = size,
                "Timeout rate exceeded, suppressing calls"
            );
            inner.suppressed_until = Some(now + self.config.suppression_period);
            inner.timeout_sample.clear();
        }
    }

    /// Forces the breaker back to closed and clears the timeout guard.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.timeout_sample.clear();
        inner.suppressed_until = None;
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (open or suppressed)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Reset all metrics
    pub fn reset_metrics(&self) {
        self.calls_total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.rejections.store(0, Ordering::Relaxed);
    }
}
