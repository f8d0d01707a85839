//! Error types for the sync layer.

use crate::remote::RemoteRecord;
use std::time::Duration;
use thiserror::Error;
use tidemark_resilience::{CircuitError, Classify, ErrorClass};
use tidemark_store::StoreError;

/// Result type for remote API calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A failed remote call, classified at the HTTP boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// HTTP 409 carrying the server's copy of the record.
    #[error("conflict on record {}", server_record.id)]
    Conflict { server_record: Box<RemoteRecord> },

    /// No bearer token was available for the request.
    #[error("not authenticated")]
    MissingToken,

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// The HTTP status, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Conflict { .. } => Some(409),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl Classify for RemoteError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Timeout => ErrorClass::Transient,
            Self::Status { status, .. } => ErrorClass::from_status(*status),
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::MissingToken => ErrorClass::Auth,
            Self::InvalidResponse(_) => ErrorClass::Permanent,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The call-site breaker refused the call.
    #[error("circuit open for {call_site}")]
    CircuitOpen { call_site: &'static str },

    /// The server rejected our credentials.
    #[error("authentication required")]
    AuthRequired,

    /// Local storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A server record failed validation.
    #[error("invalid server record {id}: {reason}")]
    InvalidServerRecord { id: String, reason: String },

    /// The whole run exceeded its hard timeout.
    #[error("sync timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Converts a breaker-wrapped remote failure.
    pub fn from_circuit(call_site: &'static str, err: CircuitError<RemoteError>) -> Self {
        match err {
            CircuitError::Inner(e) => Self::Remote(e),
            CircuitError::Rejected | CircuitError::Suppressed => Self::CircuitOpen { call_site },
        }
    }

    /// True for failures that require the user to sign in again.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            Self::AuthRequired => true,
            Self::Remote(e) => e.class() == ErrorClass::Auth,
            _ => false,
        }
    }

    /// A message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(RemoteError::Network(_) | RemoteError::Timeout) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Remote(RemoteError::Status { status: 429, .. }) => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            Self::Remote(RemoteError::Status { status, .. }) if *status >= 500 => {
                "The server is having trouble right now. Please try again later.".to_string()
            }
            Self::CircuitOpen { .. } => {
                "Sync is paused after repeated failures and will resume shortly.".to_string()
            }
            Self::Store(_) => "Local data could not be saved.".to_string(),
            Self::Timeout(_) => "Sync took too long and was stopped.".to_string(),
            Self::AuthRequired => "Please sign in again to continue syncing.".to_string(),
            other => format!("Sync failed: {other}"),
        }
    }
}
