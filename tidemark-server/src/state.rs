//! In-memory record table with tombstones and a monotonic clock.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tidemark_types::{format_timestamp, parse_timestamp_value};
use uuid::Uuid;

/// A record as the server keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub fields: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Flat wire shape: `{"id", "updated_at", <fields>}`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert(
            "updated_at".into(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        Value::Object(object)
    }
}

/// Outcome of a `PUT`.
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(StoredRecord),
    /// The payload was older than the stored version.
    Conflict(StoredRecord),
    NotFound,
}

/// A page of the change feed.
#[derive(Debug, Default)]
pub struct Changes {
    pub changed: Vec<StoredRecord>,
    pub deleted: Vec<String>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, StoredRecord>,
    tombstones: HashMap<String, DateTime<Utc>>,
    telemetry: Vec<Value>,
    last_stamp: Option<DateTime<Utc>>,
    injected: Vec<u16>,
}

/// Shared server state.
pub struct ServerState {
    token: String,
    inner: Mutex<Inner>,
}

impl ServerState {
    /// Creates an empty server that accepts `token` as its only bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `statuses.len()` record requests fail with these codes.
    pub fn inject_failures(&self, statuses: impl IntoIterator<Item = u16>) {
        self.lock().injected.extend(statuses);
    }

    pub(crate) fn take_injected(&self) -> Option<u16> {
        let mut inner = self.lock();
        if inner.injected.is_empty() {
            None
        } else {
            Some(inner.injected.remove(0))
        }
    }

    /// Inserts or overwrites a record. Ids are assigned when absent.
    pub fn create(&self, mut payload: Map<String, Value>) -> StoredRecord {
        let id = match payload.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => Uuid::now_v7().to_string(),
        };
        payload.remove("updated_at");

        let mut inner = self.lock();
        let record = StoredRecord {
            id: id.clone(),
            fields: payload,
            updated_at: inner.stamp(),
        };
        inner.tombstones.remove(&id);
        inner.records.insert(id, record.clone());
        record
    }

    /// Applies an update unless the payload is older than the stored record.
    pub fn update(&self, id: &str, mut payload: Map<String, Value>) -> UpdateOutcome {
        let client_time = payload.remove("updated_at").as_ref().and_then(parse_timestamp_value);
        payload.remove("id");

        let mut inner = self.lock();
        let Some(current) = inner.records.get(id).cloned() else {
            return UpdateOutcome::NotFound;
        };
        if client_time.is_some_and(|t| t < current.updated_at) {
            return UpdateOutcome::Conflict(current);
        }

        let record = StoredRecord {
            id: id.to_string(),
            fields: payload,
            updated_at: inner.stamp(),
        };
        inner.records.insert(id.to_string(), record.clone());
        UpdateOutcome::Updated(record)
    }

    /// Removes a record and leaves a tombstone. False if it did not exist.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.records.remove(id).is_none() {
            return false;
        }
        let stamp = inner.stamp();
        inner.tombstones.insert(id.to_string(), stamp);
        true
    }

    /// Records changed at or after `since`, oldest first, at most `limit`.
    /// Tombstones are not paged.
    pub fn changes(&self, since: Option<DateTime<Utc>>, limit: usize) -> Changes {
        let inner = self.lock();
        let after = |ts: &DateTime<Utc>| since.is_none_or(|since| *ts >= since);

        let mut changed: Vec<StoredRecord> = inner
            .records
            .values()
            .filter(|r| after(&r.updated_at))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        changed.truncate(limit);

        let mut deleted: Vec<String> = inner
            .tombstones
            .iter()
            .filter(|(_, ts)| after(ts))
            .map(|(id, _)| id.clone())
            .collect();
        deleted.sort();

        Changes { changed, deleted }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<StoredRecord> {
        self.lock().records.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_telemetry(&self, payload: Value) {
        self.lock().telemetry.push(payload);
    }

    #[must_use]
    pub fn telemetry(&self) -> Vec<Value> {
        self.lock().telemetry.clone()
    }
}

impl Inner {
    /// Millisecond clock that never repeats a value.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}
