//! Shared test helpers for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tidemark_resilience::{CircuitConfig, RetryPolicy};
use tidemark_sync::{
    ChangeSet, RemoteApi, RemoteError, RemoteRecord, RemoteResult, SyncConfig,
    TelemetryTransport,
};
use tidemark_types::{RecordId, format_timestamp};

pub type ErrorFactory = Box<dyn Fn() -> RemoteError + Send + Sync>;

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn fields(title: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("title".into(), json!(title));
    map
}

pub fn server_record(id: &str, title: &str, updated_at: Value) -> RemoteRecord {
    RemoteRecord {
        id: RecordId::from(id),
        updated_at: Some(updated_at),
        fields: fields(title),
    }
}

pub fn status(code: u16) -> RemoteError {
    RemoteError::Status {
        status: code,
        message: String::new(),
    }
}

/// Config with no backoff and breakers that never open.
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry(RetryPolicy::none())
        .with_push_breaker(CircuitConfig::default().with_failure_threshold(1000))
        .with_pull_breaker(CircuitConfig::default().with_failure_threshold(1000))
}

#[derive(Default)]
struct MockState {
    records: BTreeMap<RecordId, RemoteRecord>,
    calls: Vec<String>,
    scripted: HashMap<String, VecDeque<RemoteError>>,
    persistent: HashMap<String, ErrorFactory>,
    rename: HashMap<RecordId, RecordId>,
    pages: VecDeque<ChangeSet>,
    pull_since: Vec<Option<DateTime<Utc>>>,
    server_time: Option<DateTime<Utc>>,
    delay: Option<Duration>,
}

/// In-memory stand-in for the server.
///
/// Failure keys are either an operation (`create`, `update`, `delete`,
/// `changes`) or `op:record_id` for a single record.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call matching `key` once.
    pub fn fail_next(&self, key: &str, err: RemoteError) {
        let mut state = self.state.lock().unwrap();
        state.scripted.entry(key.to_string()).or_default().push_back(err);
    }

    /// Fails every call matching `key`.
    pub fn fail_always(&self, key: &str, err: impl Fn() -> RemoteError + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .persistent
            .insert(key.to_string(), Box::new(err));
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.scripted.clear();
        state.persistent.clear();
    }

    /// Makes create assign `server_id` to the record sent as `local_id`.
    pub fn assign_id(&self, local_id: &RecordId, server_id: &str) {
        self.state
            .lock()
            .unwrap()
            .rename
            .insert(local_id.clone(), RecordId::from(server_id));
    }

    /// Stamps every write with this server time.
    pub fn set_server_time(&self, time: DateTime<Utc>) {
        self.state.lock().unwrap().server_time = Some(time);
    }

    /// Queues a change-feed page. An empty feed is returned once pages run out.
    pub fn push_page(&self, page: ChangeSet) {
        self.state.lock().unwrap().pages.push_back(page);
    }

    /// Delays every call, to hold a sync run in flight.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn insert(&self, record: RemoteRecord) {
        self.state.lock().unwrap().records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<RemoteRecord> {
        self.state.lock().unwrap().records.get(&RecordId::from(id)).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn pull_since(&self) -> Vec<Option<DateTime<Utc>>> {
        self.state.lock().unwrap().pull_since.clone()
    }

    async fn begin(&self, op: &str, id: Option<&RecordId>) -> RemoteResult<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            let label = match id {
                Some(id) => format!("{op}:{id}"),
                None => op.to_string(),
            };
            state.calls.push(label.clone());

            for key in [label.as_str(), op] {
                if let Some(err) = state.scripted.get_mut(key).and_then(VecDeque::pop_front) {
                    return Err(err);
                }
                if let Some(factory) = state.persistent.get(key) {
                    return Err(factory());
                }
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn stamp(&self, mut record: RemoteRecord) -> RemoteRecord {
        let now = self.state.lock().unwrap().server_time.unwrap_or_else(Utc::now);
        record.updated_at = Some(Value::String(format_timestamp(&now)));
        record
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create_record(&self, payload: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        self.begin("create", Some(&payload.id)).await?;
        let mut record = self.stamp(payload.clone());
        let mut state = self.state.lock().unwrap();
        if let Some(server_id) = state.rename.get(&payload.id) {
            record.id = server_id.clone();
        }
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_record(&self, id: &RecordId, payload: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        self.begin("update", Some(id)).await?;
        let record = self.stamp(payload.clone());
        self.state.lock().unwrap().records.insert(id.clone(), record.clone());
        Ok(record)
    }

    async fn delete_record(&self, id: &RecordId) -> RemoteResult<()> {
        self.begin("delete", Some(id)).await?;
        self.state.lock().unwrap().records.remove(id);
        Ok(())
    }

    async fn get_changes(&self, _limit: usize, since: Option<DateTime<Utc>>) -> RemoteResult<ChangeSet> {
        self.state.lock().unwrap().pull_since.push(since);
        self.begin("changes", None).await?;
        Ok(self.state.lock().unwrap().pages.pop_front().unwrap_or_default())
    }
}

/// Telemetry sink that can be switched offline or made to time out.
#[derive(Default)]
pub struct MockTelemetry {
    offline: Mutex<bool>,
    timeouts_left: Mutex<usize>,
    attempts: Mutex<usize>,
    received: Mutex<Vec<Value>>,
}

impl MockTelemetry {
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    /// The next `count` sends time out.
    pub fn time_out_next(&self, count: usize) {
        *self.timeouts_left.lock().unwrap() = count;
    }

    /// Sends that reached the sink, successful or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryTransport for MockTelemetry {
    async fn send_telemetry(&self, payload: &Value) -> RemoteResult<()> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut left = self.timeouts_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(RemoteError::Timeout);
            }
        }
        if *self.offline.lock().unwrap() {
            return Err(RemoteError::Network("connection refused".into()));
        }
        self.received.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
