mod common;

use chrono::Utc;
use common::{MockRemote, fast_config, fields, server_record, status, t};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tidemark_store::RecordStore;
use tidemark_sync::{ChangeSet, PullPipeline, RemoteError, SyncConfig, SyncError};
use tidemark_types::{Record, RecordId, RecordStatus};

fn pipeline(store: &RecordStore, remote: &Arc<MockRemote>, config: &SyncConfig) -> PullPipeline {
    PullPipeline::new(store.clone(), remote.clone(), config)
}

fn page(changed: Vec<tidemark_sync::RemoteRecord>, deleted: &[&str]) -> ChangeSet {
    ChangeSet {
        changed,
        deleted: deleted.iter().map(|id| RecordId::from(*id)).collect(),
    }
}

// ── Applying changes ─────────────────────────────────────────────

#[tokio::test]
async fn first_pull_is_a_full_fetch() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    remote.push_page(page(
        vec![
            server_record("a", "A", json!("2024-05-01T10:00:00Z")),
            server_record("b", "B", json!("2024-05-01 11:00:00")),
        ],
        &[],
    ));
    let pull = pipeline(&store, &remote, &fast_config());

    let before = Utc::now();
    let report = pull.pull().await.unwrap();

    assert_eq!(remote.pull_since(), vec![None]);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.pages, 1);
    let a = store.get(&RecordId::from("a")).unwrap().unwrap();
    assert_eq!(a.status, RecordStatus::Synced);
    assert_eq!(a.get_str("title"), Some("A"));
    let watermark = store.watermark().unwrap().unwrap();
    assert!(watermark >= before - chrono::Duration::milliseconds(1));
}

#[tokio::test]
async fn next_pull_sends_the_watermark() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    store.set_watermark(t(1_700_000_000)).unwrap();
    let pull = pipeline(&store, &remote, &fast_config());

    pull.pull().await.unwrap();
    assert_eq!(remote.pull_since(), vec![Some(t(1_700_000_000))]);
}

#[tokio::test]
async fn deletions_are_applied() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    store
        .save(&Record::from_server(RecordId::from("gone"), fields("x"), t(1)))
        .unwrap();
    remote.push_page(page(vec![], &["gone"]));
    let pull = pipeline(&store, &remote, &fast_config());

    let report = pull.pull().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(store.get(&RecordId::from("gone")).unwrap().is_none());
}

#[tokio::test]
async fn upsert_overwrites_local_fields() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    store
        .save(&Record::from_server(RecordId::from("a"), fields("old"), t(1)))
        .unwrap();
    remote.push_page(page(vec![server_record("a", "new", json!(1714557600000_i64))], &[]));
    let pull = pipeline(&store, &remote, &fast_config());

    pull.pull().await.unwrap();
    let a = store.get(&RecordId::from("a")).unwrap().unwrap();
    assert_eq!(a.get_str("title"), Some("new"));
    assert_eq!(a.updated_at, t(1_714_557_600));
}

#[tokio::test]
async fn pending_local_edit_is_not_overwritten() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    store
        .save(&Record::from_server(RecordId::from("a"), fields("old"), t(1)))
        .unwrap();
    store.update(&RecordId::from("a"), fields("mine")).unwrap();
    remote.push_page(page(
        vec![
            server_record("a", "theirs", json!("2024-05-01T10:00:00Z")),
            server_record("b", "B", json!("2024-05-01T10:00:00Z")),
        ],
        &[],
    ));
    let pull = pipeline(&store, &remote, &fast_config());

    let report = pull.pull().await.unwrap();

    assert_eq!(report.upserted, 1);
    assert_eq!(report.kept_local, vec![RecordId::from("a")]);
    let a = store.get(&RecordId::from("a")).unwrap().unwrap();
    assert_eq!(a.get_str("title"), Some("mine"));
    assert_eq!(a.status, RecordStatus::PendingUpdate);
    assert!(store.get(&RecordId::from("b")).unwrap().is_some());
}

#[tokio::test]
async fn empty_feed_still_advances_watermark() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    let pull = pipeline(&store, &remote, &fast_config());

    let report = pull.pull().await.unwrap();
    assert!(report.watermark.is_some());
    assert_eq!(store.watermark().unwrap(), report.watermark);
}

// ── Watermark ────────────────────────────────────────────────────

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    let future = Utc::now() + chrono::Duration::days(365);
    let future = tidemark_types::parse_timestamp(&tidemark_types::format_timestamp(&future)).unwrap();
    store.set_watermark(future).unwrap();
    let pull = pipeline(&store, &remote, &fast_config());

    pull.pull().await.unwrap();
    assert_eq!(store.watermark().unwrap(), Some(future));
}

#[tokio::test]
async fn network_error_leaves_watermark_untouched() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    store.set_watermark(t(1_000)).unwrap();
    remote.fail_next("changes", RemoteError::Network("connection reset".into()));
    let pull = pipeline(&store, &remote, &fast_config());

    let err = pull.pull().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
    assert_eq!(store.watermark().unwrap(), Some(t(1_000)));
}

#[tokio::test]
async fn server_error_is_returned_with_user_message() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    remote.fail_next("changes", status(502));
    let pull = pipeline(&store, &remote, &fast_config());

    let err = pull.pull().await.unwrap_err();
    assert_eq!(
        err.user_message(),
        "The server is having trouble right now. Please try again later."
    );
}

// ── Validation ───────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_dates_are_skipped_individually() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    remote.push_page(page(
        vec![
            server_record("good", "G", json!("2024-05-01")),
            server_record("bad", "B", json!("not a date")),
        ],
        &[],
    ));
    let pull = pipeline(&store, &remote, &fast_config());

    let report = pull.pull().await.unwrap();
    assert_eq!(report.upserted, 1);
    assert_eq!(report.skipped, vec![RecordId::from("bad")]);
    assert!(store.get(&RecordId::from("good")).unwrap().is_some());
    assert!(store.get(&RecordId::from("bad")).unwrap().is_none());
    assert!(store.watermark().unwrap().is_some());
}

#[tokio::test]
async fn configured_date_fields_are_validated() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());

    let mut due_ok = server_record("ok", "A", json!("2024-05-01T10:00:00Z"));
    due_ok.fields.insert("due_at".into(), json!("2024-06-01"));
    let mut due_null = server_record("null", "B", json!("2024-05-01T10:00:00Z"));
    due_null.fields.insert("due_at".into(), json!(null));
    let mut due_bad = server_record("bad", "C", json!("2024-05-01T10:00:00Z"));
    due_bad.fields.insert("due_at".into(), json!("someday"));
    remote.push_page(page(vec![due_ok, due_null, due_bad], &[]));

    let config = fast_config().with_date_fields(["due_at"]);
    let pull = pipeline(&store, &remote, &config);

    let report = pull.pull().await.unwrap();
    assert_eq!(report.upserted, 2);
    assert_eq!(report.skipped, vec![RecordId::from("bad")]);
}

#[tokio::test]
async fn record_without_updated_at_is_skipped() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    let mut record = server_record("x", "X", json!(null));
    record.updated_at = None;
    remote.push_page(page(vec![record], &[]));
    let pull = pipeline(&store, &remote, &fast_config());

    let report = pull.pull().await.unwrap();
    assert_eq!(report.skipped, vec![RecordId::from("x")]);
}

// ── Paging ───────────────────────────────────────────────────────

#[tokio::test]
async fn full_pages_are_followed_until_a_partial_page() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    remote.push_page(page(
        vec![
            server_record("a", "A", json!("2024-05-01T10:00:00Z")),
            server_record("b", "B", json!("2024-05-01T11:00:00Z")),
        ],
        &[],
    ));
    remote.push_page(page(vec![server_record("c", "C", json!("2024-05-01T12:00:00Z"))], &[]));
    let pull = pipeline(&store, &remote, &fast_config().with_pull_limit(2));

    let report = pull.pull().await.unwrap();

    assert_eq!(report.pages, 2);
    assert_eq!(report.upserted, 3);
    let since = remote.pull_since();
    assert_eq!(since.len(), 2);
    assert_eq!(since[0], None);
    assert_eq!(
        since[1].map(|ts| ts.to_rfc3339()),
        Some("2024-05-01T11:00:00+00:00".to_string())
    );
    assert!(store.watermark().unwrap().unwrap() > since[1].unwrap());
}

#[tokio::test]
async fn paging_stops_at_max_pages() {
    let store = RecordStore::open_in_memory().unwrap();
    let remote = Arc::new(MockRemote::new());
    for hour in 10..14 {
        remote.push_page(page(
            vec![server_record(
                &format!("r{hour}"),
                "R",
                json!(format!("2024-05-01T{hour}:00:00Z")),
            )],
            &[],
        ));
    }
    let config = fast_config().with_pull_limit(1).with_max_pull_pages(3);
    let pull = pipeline(&store, &remote, &config);

    let report = pull.pull().await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(store.count().unwrap(), 3);
}
