//! Durable, bounded FIFO queue for payloads awaiting delivery.
//!
//! When the queue is full the oldest item is evicted to make room.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tidemark_types::{format_timestamp, parse_timestamp};
use tracing::{debug, warn};

/// An item read back from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    pub id: i64,
    pub kind: String,
    pub payload: Value,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Offline queue sharing the record store's connection.
#[derive(Clone)]
pub struct OfflineQueue {
    conn: Arc<Mutex<Connection>>,
    max_items: usize,
}

impl OfflineQueue {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, max_items: usize) -> Self {
        Self {
            conn,
            max_items: max_items.max(1),
        }
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Appends a payload, evicting the oldest items beyond capacity.
    /// Returns the new item's id.
    pub fn enqueue(&self, kind: &str, payload: &Value) -> StoreResult<i64> {
        let body = serde_json::to_string(payload)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO offline_queue (kind, payload, attempts, enqueued_at) VALUES (?1, ?2, 0, ?3)",
            params![kind, body, format_timestamp(&Utc::now())],
        )?;
        let id = tx.last_insert_rowid();

        let evicted = tx.execute(
            "DELETE FROM offline_queue WHERE id NOT IN (
                SELECT id FROM offline_queue ORDER BY id DESC LIMIT ?1
             )",
            params![self.max_items as i64],
        )?;
        tx.commit()?;

        if evicted > 0 {
            warn!(evicted, max_items = self.max_items, "Offline queue full, dropped oldest items");
        }
        debug!(id, kind, "Enqueued offline item");
        Ok(id)
    }

    /// Returns up to `limit` items, oldest first, without removing them.
    pub fn peek(&self, limit: usize) -> StoreResult<Vec<QueuedItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, attempts, enqueued_at
             FROM offline_queue ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, kind, payload, attempts, enqueued_at) = row?;
            let enqueued_at = parse_timestamp(&enqueued_at).ok_or_else(|| {
                StoreError::InvalidData(format!("queue item {id}: bad enqueued_at {enqueued_at}"))
            })?;
            items.push(QueuedItem {
                id,
                kind,
                payload: serde_json::from_str(&payload)?,
                attempts: attempts.max(0) as u32,
                enqueued_at,
            });
        }
        Ok(items)
    }

    /// Removes a delivered (or abandoned) item.
    pub fn remove(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Records a failed delivery attempt and returns the new attempt count.
    pub fn record_failure(&self, id: i64) -> StoreResult<u32> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE offline_queue SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("queue item {id}")));
        }
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM offline_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts.max(0) as u32)
    }

    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops every queued item.
    pub fn clear(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM offline_queue", [])?)
    }
}
