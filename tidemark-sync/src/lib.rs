//! Offline-first sync engine for Tidemark.
//!
//! The local store is the source of truth for the UI. A sync run pushes
//! every dirty record to the server, then pulls server changes since the
//! persisted watermark.
//!
//! ## Components
//!
//! - **Orchestrator**: single-flight runs, lifecycle notifications, stats
//! - **Push**: per-record create/update/delete with conflict arbitration
//! - **Pull**: change-feed pages applied atomically with the watermark
//! - **Remote**: the `RemoteApi` trait and its reqwest binding
//! - **Telemetry**: best-effort reporting through a durable offline queue
//!
//! Every remote call goes through a per call-site circuit breaker wrapping
//! the retry executor from `tidemark-resilience`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidemark_store::RecordStore;
//! use tidemark_sync::{HttpRemote, StaticToken, SyncConfig, SyncOrchestrator, notify};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RecordStore::open("tidemark.db")?;
//! let auth = Arc::new(StaticToken::new("token"));
//! let remote = Arc::new(HttpRemote::new("https://api.example.com", auth.clone())?);
//! let (notifier, mut events) = notify::channel();
//!
//! let engine = SyncOrchestrator::new(store, remote, auth, notifier, SyncConfig::default())?;
//! let outcome = engine.sync().await;
//! while let Ok(event) = events.try_recv() {
//!     println!("{event}");
//! }
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

mod auth;
mod config;
mod conflict;
mod error;
mod guarded;
mod http;
pub mod notify;
mod orchestrator;
mod pull;
mod push;
mod remote;
mod telemetry;

pub use auth::{AuthProvider, SharedToken, StaticToken};
pub use config::{SyncConfig, TelemetryConfig};
pub use conflict::{ConflictPolicy, ConflictResolver, Resolution};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use http::HttpRemote;
pub use notify::Notifier;
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncReport, SyncStats};
pub use pull::{PullPipeline, PullReport};
pub use push::{PushFailure, PushPipeline, PushReport};
pub use remote::{ChangeSet, RemoteApi, RemoteRecord, TelemetryTransport};
pub use telemetry::{FlushReport, TelemetryReporter};
