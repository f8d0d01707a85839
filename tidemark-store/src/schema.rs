use crate::error::StoreResult;
use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            fields TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            pending_op TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);

        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS offline_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            enqueued_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
