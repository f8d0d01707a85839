//! Sync engine configuration.

use crate::conflict::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tidemark_resilience::{CircuitConfig, MAX_BACKOFF, RetryPolicy};

use crate::error::{SyncError, SyncResult};

/// Offline telemetry queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Failed replays after which a queued item is dropped.
    pub max_attempts: u32,
    /// Queue capacity; the oldest item is evicted when full.
    pub max_items: usize,
    /// Backoff for each send. Off by default; the queue replays failures.
    pub retry: RetryPolicy,
    /// Breaker guarding telemetry sends.
    pub breaker: CircuitConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_items: 1000,
            retry: RetryPolicy::none(),
            breaker: CircuitConfig::lenient(),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backoff for every remote call.
    pub retry: RetryPolicy,
    /// Breaker guarding create/update/delete calls.
    pub push_breaker: CircuitConfig,
    /// Breaker guarding the change feed.
    pub pull_breaker: CircuitConfig,
    /// Maximum records requested per change-feed page.
    pub pull_limit: usize,
    /// Maximum change-feed pages fetched in one pull.
    pub max_pull_pages: usize,
    /// Hard limit on one sync run.
    #[serde(with = "tidemark_resilience::serde_millis")]
    pub sync_timeout: Duration,
    pub conflict_policy: ConflictPolicy,
    /// Entity fields holding dates that must parse before a pulled record
    /// is accepted.
    pub date_fields: Vec<String>,
    pub telemetry: TelemetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            push_breaker: CircuitConfig::default(),
            pull_breaker: CircuitConfig::default(),
            pull_limit: 500,
            max_pull_pages: 10,
            sync_timeout: Duration::from_secs(30),
            conflict_policy: ConflictPolicy::default(),
            date_fields: Vec::new(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Loads a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall the engine.
    pub fn validate(&self) -> SyncResult<()> {
        if self.pull_limit == 0 {
            return Err(SyncError::Config("pull_limit must be positive".into()));
        }
        if self.max_pull_pages == 0 {
            return Err(SyncError::Config("max_pull_pages must be positive".into()));
        }
        if self.sync_timeout.is_zero() {
            return Err(SyncError::Config("sync_timeout must be positive".into()));
        }
        for (name, policy) in [("retry", &self.retry), ("telemetry.retry", &self.telemetry.retry)] {
            if !policy.is_bounded() {
                return Err(SyncError::Config(format!(
                    "{name}.max_delay must be at most {}s",
                    MAX_BACKOFF.as_secs()
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_push_breaker(mut self, config: CircuitConfig) -> Self {
        self.push_breaker = config;
        self
    }

    #[must_use]
    pub fn with_pull_breaker(mut self, config: CircuitConfig) -> Self {
        self.pull_breaker = config;
        self
    }

    #[must_use]
    pub fn with_pull_limit(mut self, pull_limit: usize) -> Self {
        self.pull_limit = pull_limit;
        self
    }

    #[must_use]
    pub fn with_max_pull_pages(mut self, max_pull_pages: usize) -> Self {
        self.max_pull_pages = max_pull_pages;
        self
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    #[must_use]
    pub fn with_date_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}
