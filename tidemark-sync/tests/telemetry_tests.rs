mod common;

use common::MockTelemetry;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tidemark_resilience::{CircuitConfig, CircuitState, RetryPolicy};
use tidemark_store::RecordStore;
use tidemark_sync::{FlushReport, TelemetryConfig, TelemetryReporter};

fn reporter(store: &RecordStore, sink: &Arc<MockTelemetry>, config: TelemetryConfig) -> TelemetryReporter {
    TelemetryReporter::new(store, sink.clone(), &config)
}

#[tokio::test]
async fn online_send_is_delivered_immediately() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let telemetry = reporter(&store, &sink, TelemetryConfig::default());

    assert!(telemetry.record(json!({"event": "sync"})).await.unwrap());
    assert_eq!(sink.received(), vec![json!({"event": "sync"})]);
    assert!(telemetry.queue().is_empty().unwrap());
}

#[tokio::test]
async fn offline_send_is_queued_and_flushed_later() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let telemetry = reporter(&store, &sink, TelemetryConfig::default());

    sink.set_offline(true);
    assert!(!telemetry.record(json!({"n": 1})).await.unwrap());
    assert!(!telemetry.record(json!({"n": 2})).await.unwrap());
    assert_eq!(telemetry.queue().len().unwrap(), 2);

    sink.set_offline(false);
    let report = telemetry.on_connectivity_restored().await.unwrap();

    assert_eq!(
        report,
        FlushReport {
            sent: 2,
            retained: 0,
            dropped: 0
        }
    );
    assert_eq!(sink.received(), vec![json!({"n": 1}), json!({"n": 2})]);
    assert!(telemetry.queue().is_empty().unwrap());
}

#[tokio::test]
async fn failed_replays_are_dropped_at_max_attempts() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let config = TelemetryConfig {
        max_attempts: 2,
        ..TelemetryConfig::default()
    };
    let telemetry = reporter(&store, &sink, config);

    sink.set_offline(true);
    telemetry.record(json!({"n": 1})).await.unwrap();

    let first = telemetry.flush().await.unwrap();
    assert_eq!(first.retained, 1);
    assert_eq!(telemetry.queue().peek(1).unwrap()[0].attempts, 1);

    let second = telemetry.flush().await.unwrap();
    assert_eq!(second.dropped, 1);
    assert!(telemetry.queue().is_empty().unwrap());
}

#[tokio::test]
async fn queue_is_bounded() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let config = TelemetryConfig {
        max_items: 3,
        ..TelemetryConfig::default()
    };
    let telemetry = reporter(&store, &sink, config);

    sink.set_offline(true);
    for n in 0..5 {
        telemetry.record(json!({"n": n})).await.unwrap();
    }
    assert_eq!(telemetry.queue().len().unwrap(), 3);

    sink.set_offline(false);
    telemetry.flush().await.unwrap();
    assert_eq!(
        sink.received(),
        vec![json!({"n": 2}), json!({"n": 3}), json!({"n": 4})]
    );
}

#[tokio::test]
async fn flush_of_empty_queue_is_noop() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let telemetry = reporter(&store, &sink, TelemetryConfig::default());

    assert_eq!(telemetry.flush().await.unwrap(), FlushReport::default());
}

// ── Breaker and retry ────────────────────────────────────────────

fn guarded_config(threshold: u32) -> TelemetryConfig {
    TelemetryConfig {
        breaker: CircuitConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_secs(30)),
        ..TelemetryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn open_breaker_queues_without_calling_the_sink() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let telemetry = reporter(&store, &sink, guarded_config(2));

    sink.time_out_next(usize::MAX);
    for n in 0..4 {
        assert!(!telemetry.record(json!({"n": n})).await.unwrap());
    }

    assert_eq!(sink.attempts(), 2);
    assert_eq!(telemetry.breaker().state(), CircuitState::Open);
    assert_eq!(telemetry.breaker().rejections(), 2);
    assert_eq!(telemetry.queue().len().unwrap(), 4);
}

#[tokio::test(start_paused = true)]
async fn flush_stops_while_breaker_is_open() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let telemetry = reporter(&store, &sink, guarded_config(1));

    sink.time_out_next(1);
    telemetry.record(json!({"n": 1})).await.unwrap();
    telemetry.record(json!({"n": 2})).await.unwrap();
    assert_eq!(sink.attempts(), 1);

    let report = telemetry.flush().await.unwrap();
    assert_eq!(
        report,
        FlushReport {
            sent: 0,
            retained: 2,
            dropped: 0
        }
    );
    assert_eq!(sink.attempts(), 1);
    assert_eq!(telemetry.queue().peek(1).unwrap()[0].attempts, 0);

    tokio::time::advance(Duration::from_secs(31)).await;
    let report = telemetry.on_connectivity_restored().await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(sink.received(), vec![json!({"n": 1}), json!({"n": 2})]);
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried_before_queueing() {
    let store = RecordStore::open_in_memory().unwrap();
    let sink = Arc::new(MockTelemetry::default());
    let config = TelemetryConfig {
        retry: RetryPolicy::default()
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(10))
            .with_jitter_ratio(0.0),
        ..TelemetryConfig::default()
    };
    let telemetry = reporter(&store, &sink, config);

    sink.time_out_next(1);
    assert!(telemetry.record(json!({"event": "sync"})).await.unwrap());

    assert_eq!(sink.attempts(), 2);
    assert!(telemetry.queue().is_empty().unwrap());
}
