//! Push conflict arbitration.
//!
//! A 409 carries the server's copy of the record. Arbitration is whole
//! record: there is no field-level merge.

use crate::error::{SyncError, SyncResult};
use crate::notify::Notifier;
use crate::remote::RemoteRecord;
use serde::{Deserialize, Serialize};
use tidemark_store::RecordStore;
use tidemark_types::{Record, SyncEvent};
use tracing::{info, warn};

/// How a push conflict is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Overwrite the local record with the server's version.
    #[default]
    ServerWins,
    /// Keep the local record, mark it failed and notify the user.
    Surface,
}

/// What the resolver did with a conflicted record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The server's version replaced the local record.
    ServerWins(Record),
    /// The local record was kept and marked `sync_failed`.
    Surfaced(Record),
}

/// Settles 409 conflicts against the local store.
#[derive(Clone)]
pub struct ConflictResolver {
    store: RecordStore,
    notifier: Notifier,
    policy: ConflictPolicy,
    date_fields: Vec<String>,
}

impl ConflictResolver {
    pub fn new(
        store: RecordStore,
        notifier: Notifier,
        policy: ConflictPolicy,
        date_fields: Vec<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            date_fields,
        }
    }

    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolves a conflict for `local`.
    ///
    /// Server dates are validated first. On failure nothing is written and
    /// [`SyncError::InvalidServerRecord`] is returned, leaving the local
    /// record as it was.
    pub fn resolve(&self, local: &Record, server: &RemoteRecord) -> SyncResult<Resolution> {
        let resolved = server
            .to_record(&self.date_fields)
            .map_err(|reason| SyncError::InvalidServerRecord {
                id: server.id.to_string(),
                reason,
            })?;

        match self.policy {
            ConflictPolicy::ServerWins => {
                if resolved.id != local.id {
                    warn!(local_id = %local.id, server_id = %resolved.id, "Conflict returned a different id");
                    self.store.destroy(&local.id)?;
                }
                self.store.save(&resolved)?;
                info!(record_id = %resolved.id, "Conflict resolved, server version kept");
                Ok(Resolution::ServerWins(resolved))
            }
            ConflictPolicy::Surface => {
                let failed = self.store.mark_failed(&local.id)?;
                self.notifier.notify(SyncEvent::Conflict {
                    record_id: local.id.to_string(),
                });
                info!(record_id = %local.id, "Conflict surfaced to the user");
                Ok(Resolution::Surfaced(failed))
            }
        }
    }
}
