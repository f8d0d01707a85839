//! Lifecycle notifications.

use tidemark_types::SyncEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// Creates a connected notifier and receiver.
pub fn channel() -> (Notifier, mpsc::UnboundedReceiver<SyncEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx: Some(tx) }, rx)
}

/// Sends [`SyncEvent`]s to whoever renders them. Sending never blocks and
/// never fails; events are dropped once the receiver is gone.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl Notifier {
    /// A notifier that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, event: SyncEvent) {
        debug!(event = %event, "Sync notification");
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Notification receiver dropped");
            }
        }
    }
}
