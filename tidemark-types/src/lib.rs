//! Core type definitions for Tidemark.
//!
//! This crate defines the plugin-agnostic types shared by the store, the
//! resilience layer and the sync engine:
//! - Record identifiers (UUID v7 strings for locally created records)
//! - The generic `Record` with its lifecycle status
//! - A defensive timestamp parser for server-provided dates
//! - Lifecycle events emitted by the sync orchestrator
//!
//! Entity-specific shapes (tasks, notes, ...) live in the `fields` JSON
//! object of a record and are never interpreted here.

mod event;
mod ids;
mod record;
mod timestamp;

pub use event::SyncEvent;
pub use ids::RecordId;
pub use record::{PendingOp, Record, RecordStatus};
pub use timestamp::{format_timestamp, parse_timestamp, parse_timestamp_value};

/// Errors raised when decoding stored type names.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown record status: {0}")]
    UnknownStatus(String),

    #[error("unknown pending operation: {0}")]
    UnknownOperation(String),
}
