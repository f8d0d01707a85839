use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tidemark_store::RecordStore;
use tidemark_sync::{
    HttpRemote, StaticToken, SyncConfig, SyncOrchestrator, SyncOutcome, TelemetryReporter, notify,
};
use tidemark_types::{RecordId, RecordStatus, format_timestamp};

fn open(db: &Path) -> Result<RecordStore> {
    RecordStore::open(db).with_context(|| format!("Failed to open {}", db.display()))
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn build_fields(title: &str, json: Option<&str>) -> Result<Map<String, Value>> {
    let mut fields = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --json")? {
            Value::Object(map) => map,
            _ => bail!("--json must be a JSON object"),
        },
        None => Map::new(),
    };
    fields.insert("title".into(), Value::String(title.to_string()));
    Ok(fields)
}

pub fn add(db: &Path, title: &str, json: Option<&str>) -> Result<()> {
    let store = open(db)?;
    let record = store.create(build_fields(title, json)?)?;
    println!("{}", record.id);
    Ok(())
}

pub fn edit(db: &Path, id: &str, title: &str, json: Option<&str>) -> Result<()> {
    let store = open(db)?;
    let record = store.update(&RecordId::new(id), build_fields(title, json)?)?;
    println!("{} {}", record.id, record.status);
    Ok(())
}

pub fn delete(db: &Path, id: &str) -> Result<()> {
    let store = open(db)?;
    match store.delete(&RecordId::new(id))? {
        Some(record) => println!("{} {}", record.id, record.status),
        None => println!("{id} removed"),
    }
    Ok(())
}

pub fn list(db: &Path, format: &str) -> Result<()> {
    let store = open(db)?;
    let records = store.list()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        "text" => {
            for record in &records {
                println!(
                    "{}  {:<14}  {}  {}",
                    record.id,
                    record.status.as_str(),
                    format_timestamp(&record.updated_at),
                    record.get_str("title").unwrap_or("-"),
                );
            }
            if records.is_empty() {
                println!("No records.");
            }
        }
        other => bail!("Unknown format: {other}"),
    }
    Ok(())
}

pub fn status(db: &Path) -> Result<()> {
    let store = open(db)?;

    println!("Records: {}", store.count()?);
    for status in RecordStatus::ALL {
        let count = store.count_by_status(status)?;
        if count > 0 {
            println!("  {:<14} {count}", status.as_str());
        }
    }
    match store.watermark()? {
        Some(watermark) => println!("Last synced: {}", format_timestamp(&watermark)),
        None => println!("Last synced: never"),
    }
    let queue = store.offline_queue(SyncConfig::default().telemetry.max_items);
    println!("Queued telemetry: {}", queue.len()?);
    Ok(())
}

pub async fn sync(
    db: &Path,
    server: &str,
    token: &str,
    config: Option<&Path>,
    timeout: Option<u64>,
) -> Result<()> {
    let store = open(db)?;
    let mut config = load_config(config)?;
    if let Some(secs) = timeout {
        config = config.with_sync_timeout(Duration::from_secs(secs));
    }

    let auth = Arc::new(StaticToken::new(token));
    let remote = Arc::new(HttpRemote::new(server, auth.clone())?);
    let (notifier, mut events) = notify::channel();
    let engine = SyncOrchestrator::new(store.clone(), remote.clone(), auth, notifier, config.clone())?;

    let outcome = engine.sync().await;
    while let Ok(event) = events.try_recv() {
        println!("[{event}]");
    }

    let telemetry = TelemetryReporter::new(&store, remote, &config.telemetry);
    let stats = engine.stats();
    let delivered = telemetry
        .record(serde_json::json!({
            "event": "sync",
            "outcome": format!("{outcome:?}"),
            "records_pushed": stats.records_pushed,
            "records_pulled": stats.records_pulled,
        }))
        .await?;
    if !delivered {
        tracing::debug!("Sync telemetry queued for later");
    }

    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "Pushed {} ({} deleted, {} conflicts, {} failed), pulled {} ({} deleted, {} skipped, {} kept local)",
                report.push.synced,
                report.push.deleted,
                report.push.conflicts,
                report.push.failed(),
                report.pull.upserted,
                report.pull.deleted,
                report.pull.skipped.len(),
                report.pull.kept_local.len(),
            );
            Ok(())
        }
        SyncOutcome::NotAuthenticated => bail!("Not signed in"),
        SyncOutcome::AlreadySyncing => Ok(()),
        SyncOutcome::AuthenticationRequired => bail!("Server rejected the token"),
        SyncOutcome::Failed(message) => bail!(message),
    }
}

pub async fn flush_telemetry(
    db: &Path,
    server: &str,
    token: &str,
    config: Option<&Path>,
) -> Result<()> {
    let store = open(db)?;
    let config = load_config(config)?;
    let remote = Arc::new(HttpRemote::new(server, Arc::new(StaticToken::new(token)))?);

    let telemetry = TelemetryReporter::new(&store, remote, &config.telemetry);
    let report = telemetry.on_connectivity_restored().await?;
    println!(
        "Sent {}, retained {}, dropped {}",
        report.sent, report.retained, report.dropped
    );
    Ok(())
}
