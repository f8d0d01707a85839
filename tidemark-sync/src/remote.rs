//! Remote API abstraction.
//!
//! The sync engine only needs generic record CRUD plus a change feed. Wire
//! records are flat JSON objects: `{"id": ..., "updated_at": ..., <fields>}`.

use crate::error::RemoteResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tidemark_types::{Record, RecordId, format_timestamp, parse_timestamp_value};

/// A record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    /// Kept raw; server dates are parsed defensively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// Builds the payload sent for a local record.
    #[must_use]
    pub fn from_local(record: &Record) -> Self {
        let mut fields = record.fields.clone();
        fields.retain(|key, _| key != "id" && key != "updated_at");
        Self {
            id: record.id.clone(),
            updated_at: Some(Value::String(format_timestamp(&record.updated_at))),
            fields,
        }
    }

    /// The parsed `updated_at`, if present and well-formed.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_ref().and_then(parse_timestamp_value)
    }

    /// Validates server dates and converts into a synced local record.
    ///
    /// `updated_at` is required. Each of `date_fields` is checked only when
    /// present and non-null.
    pub fn to_record(&self, date_fields: &[String]) -> Result<Record, String> {
        let updated_at = match &self.updated_at {
            None | Some(Value::Null) => return Err("missing updated_at".to_string()),
            Some(raw) => {
                parse_timestamp_value(raw).ok_or_else(|| format!("unparseable updated_at {raw}"))?
            }
        };

        for field in date_fields {
            match self.fields.get(field) {
                None | Some(Value::Null) => {}
                Some(raw) => {
                    if parse_timestamp_value(raw).is_none() {
                        return Err(format!("unparseable {field} {raw}"));
                    }
                }
            }
        }

        Ok(Record::from_server(
            self.id.clone(),
            self.fields.clone(),
            updated_at,
        ))
    }
}

/// Changes since a watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub changed: Vec<RemoteRecord>,
    #[serde(default)]
    pub deleted: Vec<RecordId>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Generic record endpoints of the backend.
///
/// Implementations classify failures into [`RemoteError`](crate::RemoteError)
/// variants; a 409 must carry the server's record.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a record. The server may assign a different id.
    async fn create_record(&self, payload: &RemoteRecord) -> RemoteResult<RemoteRecord>;

    /// Replaces a record's fields.
    async fn update_record(&self, id: &RecordId, payload: &RemoteRecord)
    -> RemoteResult<RemoteRecord>;

    /// Deletes a record.
    async fn delete_record(&self, id: &RecordId) -> RemoteResult<()>;

    /// Records changed or deleted since `since` (everything when `None`).
    async fn get_changes(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<ChangeSet>;
}

/// Sink for best-effort telemetry payloads.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    async fn send_telemetry(&self, payload: &Value) -> RemoteResult<()>;
}
