//! Tidemark CLI
//!
//! Edits a local record store and syncs it with a Tidemark server.
//!
//! # Commands
//!
//! - `add` - Create a local record
//! - `edit` - Replace a record's fields
//! - `delete` - Delete a record locally
//! - `list` - Print local records
//! - `status` - Show pending work and the sync watermark
//! - `sync` - Push local changes, then pull remote ones
//! - `flush-telemetry` - Replay queued telemetry

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tidemark offline-first record store.
#[derive(Parser)]
#[command(name = "tidemark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local database
    #[arg(global = true, short, long, default_value = "tidemark.db")]
    db: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where and how to reach the server.
#[derive(clap::Args)]
struct Remote {
    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Bearer token
    #[arg(short, long)]
    token: String,

    /// JSON file with sync settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a local record
    Add {
        /// Record title
        title: String,

        /// Extra fields as a JSON object
        #[arg(short, long)]
        json: Option<String>,
    },

    /// Replace a record's fields
    Edit {
        id: String,

        /// New title
        title: String,

        /// Extra fields as a JSON object
        #[arg(short, long)]
        json: Option<String>,
    },

    /// Delete a record locally; the server delete happens on sync
    Delete { id: String },

    /// Print local records
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show pending work and the sync watermark
    Status,

    /// Push local changes, then pull remote ones
    Sync {
        #[command(flatten)]
        remote: Remote,

        /// Hard timeout in seconds (overrides the config file)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Replay queued telemetry
    FlushTelemetry {
        #[command(flatten)]
        remote: Remote,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Add { title, json } => commands::add(&cli.db, &title, json.as_deref()),
        Commands::Edit { id, title, json } => {
            commands::edit(&cli.db, &id, &title, json.as_deref())
        }
        Commands::Delete { id } => commands::delete(&cli.db, &id),
        Commands::List { format } => commands::list(&cli.db, &format),
        Commands::Status => commands::status(&cli.db),
        Commands::Sync { remote, timeout } => {
            commands::sync(
                &cli.db,
                &remote.server,
                &remote.token,
                remote.config.as_deref(),
                timeout,
            )
            .await
        }
        Commands::FlushTelemetry { remote } => {
            commands::flush_telemetry(
                &cli.db,
                &remote.server,
                &remote.token,
                remote.config.as_deref(),
            )
            .await
        }
    }
}
