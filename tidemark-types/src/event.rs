//! Lifecycle events emitted by the sync engine.
//!
//! Events are delivered to a notification sink over a channel. The `Display`
//! form is the stable, human-readable string a UI layer can match on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sync lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A sync run began.
    Started,
    /// Push and pull both completed.
    Succeeded,
    /// A sync was requested while another run was in flight.
    AlreadySyncing,
    /// Some records failed to push; they are marked `sync_failed`.
    PartialFailure {
        /// Records that failed.
        failed: usize,
        /// Records attempted in the push batch.
        total: usize,
    },
    /// The server rejected the credentials; the run was aborted.
    AuthenticationRequired,
    /// A push conflict was kept for the user to resolve.
    Conflict {
        /// The conflicting record.
        record_id: String,
    },
    /// The run failed with a user-facing message.
    Failed {
        /// Message suitable for display.
        message: String,
    },
}

impl SyncEvent {
    /// Builds a `Failed` event.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true for events that end a run unsuccessfully.
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::AuthenticationRequired | Self::Failed { .. })
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::AlreadySyncing => f.write_str("already-syncing"),
            Self::PartialFailure { failed, total } => write!(f, "partial-failure:{failed}/{total}"),
            Self::AuthenticationRequired => f.write_str("authentication-required"),
            Self::Conflict { record_id } => write!(f, "conflict:{record_id}"),
            Self::Failed { message } => write!(f, "failed:{message}"),
        }
    }
}
