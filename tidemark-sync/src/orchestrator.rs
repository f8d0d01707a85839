//! Sync orchestrator: one push pass followed by one pull, at most one run
//! at a time.

use crate::auth::AuthProvider;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::notify::Notifier;
use crate::pull::{PullPipeline, PullReport};
use crate::push::{PushPipeline, PushReport};
use crate::remote::RemoteApi;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tidemark_store::RecordStore;
use tidemark_types::SyncEvent;
use tracing::{debug, info, warn};

/// Combined result of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

/// How a call to [`SyncOrchestrator::sync`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No token; nothing was attempted and nothing was notified.
    NotAuthenticated,
    /// Another run was in flight.
    AlreadySyncing,
    Completed(SyncReport),
    /// The server rejected our credentials during push; pull was skipped.
    AuthenticationRequired,
    /// The run failed; carries the user-facing message.
    Failed(String),
}

impl SyncOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Cumulative statistics for one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub records_pushed: u64,
    pub records_pulled: u64,
    pub conflicts: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag when dropped, including when the run's future
/// is dropped by a timeout.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs push then pull and reports lifecycle events.
pub struct SyncOrchestrator {
    store: RecordStore,
    auth: Arc<dyn AuthProvider>,
    notifier: Notifier,
    push: PushPipeline,
    pull: PullPipeline,
    sync_timeout: Duration,
    syncing: AtomicBool,
    stats: Mutex<SyncStats>,
}

impl SyncOrchestrator {
    pub fn new(
        store: RecordStore,
        remote: Arc<dyn RemoteApi>,
        auth: Arc<dyn AuthProvider>,
        notifier: Notifier,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            push: PushPipeline::new(store.clone(), remote.clone(), notifier.clone(), &config),
            pull: PullPipeline::new(store.clone(), remote, &config),
            store,
            auth,
            notifier,
            sync_timeout: config.sync_timeout,
            syncing: AtomicBool::new(false),
            stats: Mutex::new(SyncStats::default()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[must_use]
    pub fn push_pipeline(&self) -> &PushPipeline {
        &self.push
    }

    #[must_use]
    pub fn pull_pipeline(&self) -> &PullPipeline {
        &self.pull
    }

    /// True while a run is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> MutexGuard<'_, SyncStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one sync bounded by the configured timeout.
    pub async fn sync(&self) -> SyncOutcome {
        self.sync_with_timeout(self.sync_timeout).await
    }

    /// Runs one sync, abandoning it after `limit`.
    pub async fn sync_with_timeout(&self, limit: Duration) -> SyncOutcome {
        if self.auth.token().is_none() {
            debug!("No auth token, skipping sync");
            return SyncOutcome::NotAuthenticated;
        }

        let Some(_guard) = FlightGuard::acquire(&self.syncing) else {
            debug!("Sync already in flight");
            self.notifier.notify(SyncEvent::AlreadySyncing);
            return SyncOutcome::AlreadySyncing;
        };

        self.notifier.notify(SyncEvent::Started);
        info!("Sync started");

        let result = match tokio::time::timeout(limit, self.run()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Sync timed out");
                Err(SyncError::Timeout(limit))
            }
        };

        self.finish(result)
    }

    async fn run(&self) -> SyncResult<SyncReport> {
        let push = self.push.push().await?;
        let pull = self.pull.pull().await?;
        Ok(SyncReport { push, pull })
    }

    fn finish(&self, result: SyncResult<SyncReport>) -> SyncOutcome {
        let mut stats = self.lock_stats();
        stats.runs += 1;

        match result {
            Ok(report) => {
                stats.successes += 1;
                stats.records_pushed += (report.push.synced + report.push.deleted) as u64;
                stats.records_pulled += report.pull.upserted as u64;
                stats.conflicts += report.push.conflicts as u64;
                stats.last_success_at = Some(Utc::now());
                drop(stats);

                info!(
                    pushed = report.push.synced + report.push.deleted,
                    pulled = report.pull.upserted,
                    "Sync succeeded"
                );
                self.notifier.notify(SyncEvent::Succeeded);
                SyncOutcome::Completed(report)
            }
            Err(err) if err.is_auth() => {
                stats.failures += 1;
                stats.last_error = Some(err.to_string());
                drop(stats);

                warn!("Sync aborted, authentication required");
                self.notifier.notify(SyncEvent::AuthenticationRequired);
                SyncOutcome::AuthenticationRequired
            }
            Err(err) => {
                stats.failures += 1;
                stats.last_error = Some(err.to_string());
                drop(stats);

                let message = err.user_message();
                warn!(error = %err, "Sync failed");
                self.notifier.notify(SyncEvent::failed(message.clone()));
                SyncOutcome::Failed(message)
            }
        }
    }
}
