//! Push pipeline: sends local changes to the server.
//!
//! Dirty records are pushed one at a time in store order. A failure on one
//! record never stops the others. Every record that enters the pass ends it
//! synced, failed or destroyed, except when the server rejects our
//! credentials: then the pass is abandoned and failed records are left as
//! they were.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::guarded::guarded_call;
use crate::notify::Notifier;
use crate::remote::{RemoteApi, RemoteRecord};
use std::sync::Arc;
use tidemark_resilience::{CircuitBreaker, CircuitError, RetryPolicy};
use tidemark_store::RecordStore;
use tidemark_types::{PendingOp, Record, RecordId, SyncEvent};
use tracing::{debug, info, warn};

const CALL_SITE: &str = "push";

/// A record that could not be pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub record_id: RecordId,
    pub error: String,
}

/// Outcome of one push pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Dirty records found at the start of the pass.
    pub attempted: usize,
    /// Creates and updates acknowledged by the server.
    pub synced: usize,
    /// Local records destroyed after a server delete.
    pub deleted: usize,
    /// 409s handed to the conflict resolver.
    pub conflicts: usize,
    pub failures: Vec<PushFailure>,
}

impl PushReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

enum Pushed {
    Synced,
    Destroyed,
    Resolved,
}

/// Pushes dirty records through the push call-site breaker.
pub struct PushPipeline {
    store: RecordStore,
    remote: Arc<dyn RemoteApi>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    resolver: ConflictResolver,
    notifier: Notifier,
}

impl PushPipeline {
    pub fn new(
        store: RecordStore,
        remote: Arc<dyn RemoteApi>,
        notifier: Notifier,
        config: &SyncConfig,
    ) -> Self {
        let resolver = ConflictResolver::new(
            store.clone(),
            notifier.clone(),
            config.conflict_policy,
            config.date_fields.clone(),
        );
        Self {
            store,
            remote,
            breaker: Arc::new(CircuitBreaker::new(CALL_SITE, config.push_breaker.clone())),
            retry: config.retry.clone(),
            resolver,
            notifier,
        }
    }

    /// The breaker guarding push calls.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Pushes every dirty record.
    ///
    /// Returns [`SyncError::AuthRequired`] if any call was rejected for
    /// authentication. Other per-record failures are reported, not returned.
    pub async fn push(&self) -> SyncResult<PushReport> {
        let dirty = self.store.dirty()?;
        let mut report = PushReport {
            attempted: dirty.len(),
            ..PushReport::default()
        };
        if dirty.is_empty() {
            debug!("Nothing to push");
            return Ok(report);
        }

        let mut auth_rejected = false;
        for record in &dirty {
            let Some(op) = record.next_op() else {
                continue;
            };
            match self.push_one(record, op).await {
                Ok(Pushed::Synced) => report.synced += 1,
                Ok(Pushed::Destroyed) => report.deleted += 1,
                Ok(Pushed::Resolved) => report.conflicts += 1,
                Err(err) => {
                    warn!(record_id = %record.id, op = %op, error = %err, "Push failed");
                    auth_rejected |= err.is_auth();
                    report.failures.push(PushFailure {
                        record_id: record.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        if auth_rejected {
            warn!("Push rejected for authentication, abandoning sync");
            return Err(SyncError::AuthRequired);
        }

        for failure in &report.failures {
            self.store.mark_failed(&failure.record_id)?;
        }

        if !report.failures.is_empty() {
            self.notifier.notify(SyncEvent::PartialFailure {
                failed: report.failed(),
                total: report.attempted,
            });
        }

        info!(
            attempted = report.attempted,
            synced = report.synced,
            deleted = report.deleted,
            conflicts = report.conflicts,
            failed = report.failed(),
            "Push complete"
        );
        Ok(report)
    }

    async fn push_one(&self, record: &Record, op: PendingOp) -> SyncResult<Pushed> {
        match op {
            PendingOp::Create => {
                let payload = RemoteRecord::from_local(record);
                let result = guarded_call(&self.breaker, &self.retry, "create_record", || {
                    self.remote.create_record(&payload)
                })
                .await;
                self.settle_write(record, result)
            }
            PendingOp::Update => {
                let payload = RemoteRecord::from_local(record);
                let result = guarded_call(&self.breaker, &self.retry, "update_record", || {
                    self.remote.update_record(&record.id, &payload)
                })
                .await;
                self.settle_write(record, result)
            }
            PendingOp::Delete => {
                let result = guarded_call(&self.breaker, &self.retry, "delete_record", || {
                    self.remote.delete_record(&record.id)
                })
                .await;
                match result {
                    Ok(()) => {}
                    Err(CircuitError::Inner(err)) if err.is_not_found() => {
                        debug!(record_id = %record.id, "Already deleted on server");
                    }
                    Err(err) => return self.settle_error(record, err),
                }
                self.store.destroy(&record.id)?;
                Ok(Pushed::Destroyed)
            }
        }
    }

    fn settle_write(
        &self,
        record: &Record,
        result: Result<RemoteRecord, CircuitError<RemoteError>>,
    ) -> SyncResult<Pushed> {
        let server = match result {
            Ok(server) => server,
            Err(err) => return self.settle_error(record, err),
        };
        let updated_at = server.updated_at().unwrap_or_else(|| {
            warn!(record_id = %record.id, "Server response has no usable updated_at, keeping local");
            record.updated_at
        });
        self.store.mark_synced(&record.id, &server.id, updated_at)?;
        Ok(Pushed::Synced)
    }

    fn settle_error(&self, record: &Record, err: CircuitError<RemoteError>) -> SyncResult<Pushed> {
        match err {
            CircuitError::Inner(RemoteError::Conflict { server_record }) => {
                match self.resolver.resolve(record, &server_record)? {
                    Resolution::ServerWins(_) => debug!(record_id = %record.id, "Server version adopted"),
                    Resolution::Surfaced(_) => debug!(record_id = %record.id, "Conflict left for the user"),
                }
                Ok(Pushed::Resolved)
            }
            other => Err(SyncError::from_circuit(CALL_SITE, other)),
        }
    }
}
