//! Persistent record store backed by SQLite.
//!
//! Every mutation is a read-modify-write under the connection lock: the
//! current row is decoded into a `Record`, transformed by one of the
//! `Record` state methods, and the returned value is written back.

use crate::error::{StoreError, StoreResult};
use crate::offline_queue::OfflineQueue;
use crate::{WATERMARK_KEY, schema};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tidemark_types::{Record, RecordId, RecordStatus, format_timestamp, parse_timestamp};
use tracing::{debug, info, warn};

const SELECT_RECORDS: &str = "SELECT id, fields, status, updated_at, pending_op FROM records";

/// Result of applying one pull cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortOutcome {
    /// Local rows removed by server deletions.
    pub deleted: usize,
    /// Records inserted or overwritten.
    pub upserted: usize,
    /// Server changes not applied because the local row has unsent edits.
    pub kept_local: Vec<RecordId>,
    /// Watermark persisted with the cohort.
    pub watermark: DateTime<Utc>,
}

/// Keyed record collection with sync status and the pull watermark.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Opens (or creates) a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened record store");
        Self::from_connection(conn)
    }

    /// Opens an in-memory record store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Returns a durable offline queue sharing this store's database.
    pub fn offline_queue(&self, max_items: usize) -> OfflineQueue {
        OfflineQueue::new(self.conn.clone(), max_items)
    }

    // ── Local edits ──────────────────────────────────────────────

    /// Creates a record on this device. It is pushed on the next sync.
    pub fn create(&self, fields: Map<String, Value>) -> StoreResult<Record> {
        let record = Record::new_local(fields, now());
        let conn = self.conn()?;
        write_record(&conn, &record)?;
        debug!(record_id = %record.id, "Created local record");
        Ok(record)
    }

    /// Replaces the fields of a record and marks it dirty.
    pub fn update(&self, id: &RecordId, fields: Map<String, Value>) -> StoreResult<Record> {
        let conn = self.conn()?;
        let current = get_record(&conn, id)?
            .filter(|r| r.status != RecordStatus::PendingDelete)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let updated = current.edited(fields, now());
        write_record(&conn, &updated)?;
        debug!(record_id = %id, status = %updated.status, "Updated local record");
        Ok(updated)
    }

    /// Deletes a record locally.
    ///
    /// Returns the tombstoned record awaiting a server delete, or `None` when
    /// the record had never been pushed and was destroyed outright.
    pub fn delete(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        let conn = self.conn()?;
        let current = get_record(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match current.deleted(now()) {
            Some(tombstone) => {
                write_record(&conn, &tombstone)?;
                debug!(record_id = %id, "Marked record for deletion");
                Ok(Some(tombstone))
            }
            None => {
                conn.execute("DELETE FROM records WHERE id = ?1", params![id.as_str()])?;
                debug!(record_id = %id, "Destroyed unpushed record");
                Ok(None)
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Loads a record by id.
    pub fn get(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        let conn = self.conn()?;
        get_record(&conn, id)
    }

    /// Lists every record in insertion order.
    pub fn list(&self) -> StoreResult<Vec<Record>> {
        let conn = self.conn()?;
        query_records(&conn, &format!("{SELECT_RECORDS} ORDER BY rowid"), [])
    }

    /// Lists records whose status is not `synced`, in insertion order.
    pub fn dirty(&self) -> StoreResult<Vec<Record>> {
        let conn = self.conn()?;
        query_records(
            &conn,
            &format!("{SELECT_RECORDS} WHERE status != ?1 ORDER BY rowid"),
            params![RecordStatus::Synced.as_str()],
        )
    }

    /// Returns the total number of records.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns the number of records with the given status.
    pub fn count_by_status(&self, status: RecordStatus) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Sync transitions ─────────────────────────────────────────

    /// Writes a complete record, inserting or overwriting by id.
    pub fn save(&self, record: &Record) -> StoreResult<()> {
        let conn = self.conn()?;
        write_record(&conn, record)
    }

    /// Marks a pushed record as synced at the server's `updated_at`.
    ///
    /// When the server assigned a different id the row is re-keyed in the
    /// same transaction.
    pub fn mark_synced(
        &self,
        id: &RecordId,
        server_id: &RecordId,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Record> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = get_record(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut synced = current.synced(updated_at);
        if server_id != id {
            tx.execute("DELETE FROM records WHERE id = ?1", params![id.as_str()])?;
            debug!(local_id = %id, server_id = %server_id, "Re-keying record to server id");
            synced.id = server_id.clone();
        }
        write_record(&tx, &synced)?;
        tx.commit()?;
        Ok(synced)
    }

    /// Marks a record whose push failed.
    pub fn mark_failed(&self, id: &RecordId) -> StoreResult<Record> {
        let conn = self.conn()?;
        let current = get_record(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let failed = current.failed();
        write_record(&conn, &failed)?;
        Ok(failed)
    }

    /// Permanently removes a record. Returns false if it did not exist.
    pub fn destroy(&self, id: &RecordId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM records WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    // ── Watermark ────────────────────────────────────────────────

    /// Returns the persisted pull watermark, if any.
    ///
    /// An unreadable value is treated as absent, which forces a full fetch.
    pub fn watermark(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        read_watermark(&conn)
    }

    /// Overwrites the pull watermark.
    pub fn set_watermark(&self, watermark: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        write_meta(&conn, WATERMARK_KEY, &format_timestamp(&watermark))
    }

    // ── Pull cohort ──────────────────────────────────────────────

    /// Applies a pulled cohort atomically: deletions, then upserts, then the
    /// watermark. Nothing is written unless every step succeeds.
    ///
    /// Rows with unsent local edits (any status other than `Synced`) are left
    /// untouched and reported in `kept_local`; the next push carries them.
    ///
    /// The persisted watermark is the later of the stored one and
    /// `candidate`, so it never moves backwards.
    pub fn apply_cohort(
        &self,
        deleted: &[RecordId],
        upserts: &[Record],
        candidate: DateTime<Utc>,
    ) -> StoreResult<CohortOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut kept_local = Vec::new();
        let mut deleted_count = 0;
        for id in deleted {
            if has_local_edits(&tx, id)? {
                kept_local.push(id.clone());
                continue;
            }
            deleted_count += tx.execute("DELETE FROM records WHERE id = ?1", params![id.as_str()])?;
        }

        let mut upserted = 0;
        for record in upserts {
            if has_local_edits(&tx, &record.id)? {
                kept_local.push(record.id.clone());
                continue;
            }
            write_record(&tx, record)?;
            upserted += 1;
        }

        let candidate = candidate.trunc_subsecs(3);
        let watermark = match read_watermark(&tx)? {
            Some(previous) if previous > candidate => previous,
            _ => candidate,
        };
        write_meta(&tx, WATERMARK_KEY, &format_timestamp(&watermark))?;

        tx.commit()?;

        if !kept_local.is_empty() {
            info!(count = kept_local.len(), "Kept local edits over pulled changes");
        }

        Ok(CohortOutcome {
            deleted: deleted_count,
            upserted,
            kept_local,
            watermark,
        })
    }
}

/// Local edit time at the precision the store persists.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

struct RawRecord {
    id: String,
    fields: String,
    status: String,
    updated_at: String,
    pending_op: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            fields: row.get(1)?,
            status: row.get(2)?,
            updated_at: row.get(3)?,
            pending_op: row.get(4)?,
        })
    }

    fn decode(self) -> StoreResult<Record> {
        let fields: Map<String, Value> = serde_json::from_str(&self.fields)?;
        let status = self
            .status
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("record {}: {e}", self.id)))?;
        let updated_at = parse_timestamp(&self.updated_at).ok_or_else(|| {
            StoreError::InvalidData(format!("record {}: bad updated_at {}", self.id, self.updated_at))
        })?;
        let pending_op = match self.pending_op {
            Some(op) => Some(
                op.parse()
                    .map_err(|e| StoreError::InvalidData(format!("record {}: {e}", self.id)))?,
            ),
            None => None,
        };
        Ok(Record {
            id: RecordId::new(self.id),
            fields,
            status,
            updated_at,
            pending_op,
        })
    }
}

fn get_record(conn: &Connection, id: &RecordId) -> StoreResult<Option<Record>> {
    conn.query_row(
        &format!("{SELECT_RECORDS} WHERE id = ?1"),
        params![id.as_str()],
        RawRecord::from_row,
    )
    .optional()?
    .map(RawRecord::decode)
    .transpose()
}

fn has_local_edits(conn: &Connection, id: &RecordId) -> StoreResult<bool> {
    Ok(get_record(conn, id)?.is_some_and(|record| record.is_dirty()))
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawRecord::from_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.decode()?);
    }
    Ok(records)
}

fn write_record(conn: &Connection, record: &Record) -> StoreResult<()> {
    let fields = serde_json::to_string(&record.fields)?;
    conn.execute(
        "INSERT INTO records (id, fields, status, updated_at, pending_op)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            fields = excluded.fields,
            status = excluded.status,
            updated_at = excluded.updated_at,
            pending_op = excluded.pending_op",
        params![
            record.id.as_str(),
            fields,
            record.status.as_str(),
            format_timestamp(&record.updated_at),
            record.pending_op.map(|op| op.as_str()),
        ],
    )?;
    Ok(())
}

fn read_watermark(conn: &Connection) -> StoreResult<Option<DateTime<Utc>>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?1",
            params![WATERMARK_KEY],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|raw| {
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            warn!(value = %raw, "Ignoring unreadable watermark");
        }
        parsed
    }))
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
