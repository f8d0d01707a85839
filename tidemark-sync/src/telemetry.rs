//! Best-effort telemetry with an offline queue.
//!
//! Every send goes through the telemetry call-site breaker and retry policy.
//! Sends that fail, or that the breaker refuses, are persisted and replayed
//! by [`TelemetryReporter::flush`]. Items that keep failing are dropped after
//! `max_attempts` replays.

use crate::config::TelemetryConfig;
use crate::error::SyncResult;
use crate::guarded::guarded_call;
use crate::remote::TelemetryTransport;
use serde_json::Value;
use std::sync::Arc;
use tidemark_resilience::{CircuitBreaker, RetryPolicy};
use tidemark_store::{OfflineQueue, RecordStore};
use tracing::{debug, info, warn};

const KIND: &str = "telemetry";
const CALL_SITE: &str = "telemetry";

/// Result of replaying the offline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    /// Still queued after a failed replay.
    pub retained: usize,
    /// Removed after reaching `max_attempts`.
    pub dropped: usize,
}

pub struct TelemetryReporter {
    queue: OfflineQueue,
    transport: Arc<dyn TelemetryTransport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    max_attempts: u32,
}

impl TelemetryReporter {
    pub fn new(
        store: &RecordStore,
        transport: Arc<dyn TelemetryTransport>,
        config: &TelemetryConfig,
    ) -> Self {
        Self {
            queue: store.offline_queue(config.max_items),
            transport,
            breaker: Arc::new(CircuitBreaker::new(CALL_SITE, config.breaker.clone())),
            retry: config.retry.clone(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// The breaker guarding telemetry sends.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Sends `payload`, queueing it on failure. Returns true if delivered now.
    pub async fn record(&self, payload: Value) -> SyncResult<bool> {
        let sent = guarded_call(&self.breaker, &self.retry, "send_telemetry", || {
            self.transport.send_telemetry(&payload)
        })
        .await;

        match sent {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(error = %err, "Telemetry send failed, queueing");
                self.queue.enqueue(KIND, &payload)?;
                Ok(false)
            }
        }
    }

    /// Replays queued items once, oldest first.
    ///
    /// Stops early when the breaker refuses a send; the remaining items stay
    /// queued without counting an attempt.
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        let items = self.queue.peek(self.queue.max_items())?;
        let mut report = FlushReport::default();

        for (index, item) in items.iter().enumerate() {
            let sent = guarded_call(&self.breaker, &self.retry, "send_telemetry", || {
                self.transport.send_telemetry(&item.payload)
            })
            .await;

            match sent {
                Ok(()) => {
                    self.queue.remove(item.id)?;
                    report.sent += 1;
                }
                Err(err) if err.is_short_circuit() => {
                    let remaining = items.len() - index;
                    debug!(remaining, error = %err, "Telemetry breaker refused, keeping the rest queued");
                    report.retained += remaining;
                    break;
                }
                Err(err) => {
                    let attempts = self.queue.record_failure(item.id)?;
                    if attempts >= self.max_attempts {
                        warn!(id = item.id, attempts, error = %err, "Dropping telemetry item");
                        self.queue.remove(item.id)?;
                        report.dropped += 1;
                    } else {
                        report.retained += 1;
                    }
                }
            }
        }

        if report != FlushReport::default() {
            info!(sent = report.sent, retained = report.retained, dropped = report.dropped, "Telemetry flushed");
        }
        Ok(report)
    }

    /// Replays the queue after the device comes back online.
    pub async fn on_connectivity_restored(&self) -> SyncResult<FlushReport> {
        debug!("Connectivity restored, flushing telemetry");
        self.flush().await
    }
}
