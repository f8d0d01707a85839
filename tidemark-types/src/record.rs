//! The generic record model.
//!
//! A record is an opaque JSON object plus sync bookkeeping. Every state
//! change is a method that consumes the record and returns the new value,
//! so callers always persist a complete, consistent record.

use crate::{Error, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Sync lifecycle status of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Local copy matches the server.
    Synced,
    /// Created locally, never acknowledged by the server.
    PendingCreate,
    /// Edited locally since the last sync.
    PendingUpdate,
    /// Deleted locally, server delete not yet acknowledged.
    PendingDelete,
    /// The last push attempt failed; retried on the next pass.
    SyncFailed,
}

impl RecordStatus {
    /// All statuses, in declaration order.
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::Synced,
        RecordStatus::PendingCreate,
        RecordStatus::PendingUpdate,
        RecordStatus::PendingDelete,
        RecordStatus::SyncFailed,
    ];

    /// Column value used by the local store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::PendingCreate => "pending_create",
            Self::PendingUpdate => "pending_update",
            Self::PendingDelete => "pending_delete",
            Self::SyncFailed => "sync_failed",
        }
    }

    /// Returns true for every status other than `Synced`.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        !matches!(self, Self::Synced)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending_create" => Ok(Self::PendingCreate),
            "pending_update" => Ok(Self::PendingUpdate),
            "pending_delete" => Ok(Self::PendingDelete),
            "sync_failed" => Ok(Self::SyncFailed),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// The remote operation a dirty record still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Create,
    Update,
    Delete,
}

impl PendingOp {
    /// Column value used by the local store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// The pending status that corresponds to this operation.
    #[must_use]
    pub const fn pending_status(&self) -> RecordStatus {
        match self {
            Self::Create => RecordStatus::PendingCreate,
            Self::Update => RecordStatus::PendingUpdate,
            Self::Delete => RecordStatus::PendingDelete,
        }
    }
}

impl fmt::Display for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

/// A locally stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Entity fields. Never inspected by the sync engine.
    pub fields: Map<String, Value>,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
    /// Remote operation still owed to the server. Kept while the record is
    /// `SyncFailed`, cleared once it is `Synced`.
    pub pending_op: Option<PendingOp>,
}

impl Record {
    /// A record created on this device, waiting for its first push.
    #[must_use]
    pub fn new_local(fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::generate(),
            fields,
            status: RecordStatus::PendingCreate,
            updated_at: now,
            pending_op: Some(PendingOp::Create),
        }
    }

    /// A record exactly as the server knows it.
    #[must_use]
    pub fn from_server(id: RecordId, fields: Map<String, Value>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fields,
            status: RecordStatus::Synced,
            updated_at,
            pending_op: None,
        }
    }

    /// Returns true if the record has changes the server has not seen.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.status.is_dirty()
    }

    /// The remote call the push pipeline must make for this record.
    ///
    /// `SyncFailed` records replay the operation that failed; a failed record
    /// with no remembered operation is treated as an update.
    #[must_use]
    pub fn next_op(&self) -> Option<PendingOp> {
        match self.status {
            RecordStatus::Synced => None,
            RecordStatus::PendingCreate => Some(PendingOp::Create),
            RecordStatus::PendingUpdate => Some(PendingOp::Update),
            RecordStatus::PendingDelete => Some(PendingOp::Delete),
            RecordStatus::SyncFailed => Some(self.pending_op.unwrap_or(PendingOp::Update)),
        }
    }

    /// Applies a local edit.
    ///
    /// A record the server has never seen stays a pending create.
    #[must_use]
    pub fn edited(self, fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        let op = match self.next_op() {
            Some(PendingOp::Create) => PendingOp::Create,
            _ => PendingOp::Update,
        };
        Self {
            fields,
            status: op.pending_status(),
            updated_at: now,
            pending_op: Some(op),
            ..self
        }
    }

    /// Applies a local delete.
    ///
    /// Returns `None` when the record was never pushed and can simply be
    /// destroyed.
    #[must_use]
    pub fn deleted(self, now: DateTime<Utc>) -> Option<Self> {
        if self.next_op() == Some(PendingOp::Create) {
            return None;
        }
        Some(Self {
            status: RecordStatus::PendingDelete,
            updated_at: now,
            pending_op: Some(PendingOp::Delete),
            ..self
        })
    }

    /// The server acknowledged this record at `updated_at`.
    #[must_use]
    pub fn synced(self, updated_at: DateTime<Utc>) -> Self {
        Self {
            status: RecordStatus::Synced,
            updated_at,
            pending_op: None,
            ..self
        }
    }

    /// The last push failed. The owed operation is remembered for the retry.
    #[must_use]
    pub fn failed(self) -> Self {
        let pending_op = self.next_op();
        Self {
            status: RecordStatus::SyncFailed,
            pending_op,
            ..self
        }
    }

    /// Extracts a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}
