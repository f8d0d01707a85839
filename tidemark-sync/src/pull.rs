//! Pull pipeline: applies server changes since the watermark.
//!
//! Each change-feed page is applied as one cohort in a single SQLite
//! transaction: deletions, then upserts, then the watermark. The watermark
//! is captured before the request so changes made during the request are
//! fetched again next time rather than missed. Records with unsent local
//! edits are never overwritten by a pull.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::guarded::guarded_call;
use crate::remote::RemoteApi;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tidemark_resilience::{CircuitBreaker, RetryPolicy};
use tidemark_store::RecordStore;
use tidemark_types::RecordId;
use tracing::{debug, info, warn};

const CALL_SITE: &str = "pull";

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Change-feed pages applied.
    pub pages: usize,
    /// Local rows removed by server deletions.
    pub deleted: usize,
    /// Records inserted or overwritten.
    pub upserted: usize,
    /// Server records rejected by date validation.
    pub skipped: Vec<RecordId>,
    /// Server changes not applied because the local copy has unsent edits.
    pub kept_local: Vec<RecordId>,
    /// Watermark after the pull.
    pub watermark: Option<DateTime<Utc>>,
}

/// Fetches and applies server changes through the pull call-site breaker.
pub struct PullPipeline {
    store: RecordStore,
    remote: Arc<dyn RemoteApi>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    pull_limit: usize,
    max_pages: usize,
    date_fields: Vec<String>,
}

impl PullPipeline {
    pub fn new(store: RecordStore, remote: Arc<dyn RemoteApi>, config: &SyncConfig) -> Self {
        Self {
            store,
            remote,
            breaker: Arc::new(CircuitBreaker::new(CALL_SITE, config.pull_breaker.clone())),
            retry: config.retry.clone(),
            pull_limit: config.pull_limit.max(1),
            max_pages: config.max_pull_pages.max(1),
            date_fields: config.date_fields.clone(),
        }
    }

    /// The breaker guarding the change feed.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Pulls changes until the feed returns a partial page.
    ///
    /// A network or server error leaves the watermark where the last fully
    /// applied page put it.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let mut report = PullReport {
            watermark: self.store.watermark()?,
            ..PullReport::default()
        };

        while report.pages < self.max_pages {
            let since = report.watermark;
            let has_more = self.pull_page(since, &mut report).await?;
            if !has_more {
                break;
            }
            if report.watermark <= since {
                warn!("Change feed page did not advance the watermark, stopping");
                break;
            }
            debug!(pages = report.pages, "Change feed has more, fetching next page");
        }

        info!(
            pages = report.pages,
            deleted = report.deleted,
            upserted = report.upserted,
            skipped = report.skipped.len(),
            kept_local = report.kept_local.len(),
            "Pull complete"
        );
        Ok(report)
    }

    /// Applies one page. Returns true when the page was full.
    async fn pull_page(
        &self,
        since: Option<DateTime<Utc>>,
        report: &mut PullReport,
    ) -> SyncResult<bool> {
        let request_time = Utc::now();
        let limit = self.pull_limit;

        let changes = guarded_call(&self.breaker, &self.retry, "get_changes", || {
            self.remote.get_changes(limit, since)
        })
        .await
        .map_err(|e| SyncError::from_circuit(CALL_SITE, e))?;

        let has_more = changes.changed.len() >= limit;
        let mut upserts = Vec::with_capacity(changes.changed.len());
        let mut newest: Option<DateTime<Utc>> = None;
        for remote in &changes.changed {
            match remote.to_record(&self.date_fields) {
                Ok(record) => {
                    newest = newest.max(Some(record.updated_at));
                    upserts.push(record);
                }
                Err(reason) => {
                    warn!(record_id = %remote.id, reason = %reason, "Skipping server record");
                    report.skipped.push(remote.id.clone());
                }
            }
        }

        // A full page may have left newer changes on the server; only claim
        // what was actually received.
        let candidate = if has_more {
            newest.or(since).unwrap_or(request_time).min(request_time)
        } else {
            request_time
        };

        let outcome = self
            .store
            .apply_cohort(&changes.deleted, &upserts, candidate)?;

        report.pages += 1;
        report.deleted += outcome.deleted;
        report.upserted += outcome.upserted;
        report.kept_local.extend(outcome.kept_local);
        report.watermark = Some(outcome.watermark);
        Ok(has_more)
    }
}
