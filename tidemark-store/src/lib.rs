//! SQLite storage layer for Tidemark.
//!
//! Provides durable local state for the sync engine:
//! - `RecordStore`: keyed records with their sync status, plus the pull
//!   watermark stored under a single well-known key
//! - `OfflineQueue`: a bounded, durable queue for best-effort payloads
//!   (telemetry) that could not be delivered
//!
//! Both share one SQLite connection so a store opened on a file keeps all
//! local sync state in that file.

mod error;
mod offline_queue;
mod record_store;
mod schema;

pub use error::{StoreError, StoreResult};
pub use offline_queue::{OfflineQueue, QueuedItem};
pub use record_store::{CohortOutcome, RecordStore};

/// Key under which the pull watermark is persisted.
pub const WATERMARK_KEY: &str = "last_synced_at";
