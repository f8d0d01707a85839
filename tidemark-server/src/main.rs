//! Tidemark reference server
//!
//! Serves the record API from memory for local development and demos.
//!
//! Usage:
//!   tidemark-server --port 8080 --token dev-token
//!
//! All data is lost when the process exits.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tidemark_server::{ServerState, build_router};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tidemark-server")]
#[command(about = "In-memory Tidemark record API")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Bearer token clients must present
    #[arg(short, long, default_value = "dev-token")]
    token: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let state = Arc::new(ServerState::new(args.token));
    let app = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Tidemark server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
