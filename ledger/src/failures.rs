//! Failure events for fire-and-forget operations.
//!
//! Some callers issue `record_transaction` and the available-inputs writes
//! without awaiting the result. Those failures are still logged and, in
//! addition, broadcast as [`FailureEvent`]s so a supervisor task can watch
//! them. Nobody listening is fine; events are simply dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::FAILURE_CHANNEL_CAPACITY;
use crate::error::LedgerError;

/// One failed store operation.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub operation: &'static str,
    /// What the operation was about, e.g. a transaction hash or
    /// `key_hash/product`.
    pub subject: String,
    /// [`LedgerError::reason`] of the failure.
    pub reason: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct FailureChannel {
    tx: broadcast::Sender<FailureEvent>,
}

impl FailureChannel {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<FailureEvent> {
        self.tx.subscribe()
    }

    /// Logs the failure and publishes it to subscribers.
    pub(crate) fn report(&self, operation: &'static str, subject: &str, err: &LedgerError) {
        tracing::error!(
            operation,
            subject,
            reason = err.reason(),
            error = %err,
            "store operation failed"
        );

        // Err here only means there are no subscribers.
        let _ = self.tx.send(FailureEvent {
            operation,
            subject: subject.to_string(),
            reason: err.reason(),
            message: err.to_string(),
            at: Utc::now(),
        });
    }
}
