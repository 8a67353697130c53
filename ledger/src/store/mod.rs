//! # LedgerStore
//!
//! The handle callers use for every ledger operation. Construct it once at
//! startup with [`LedgerStore::open`] and clone it into whatever component
//! needs persistence; clones share one connection pool, one metrics
//! registry and one failure channel.
//!
//! ## Operations
//!
//! ```text
//! keys.rs          register_key, get_public_key, get_key, find_key,
//!                  activate/deactivate, remove_key, list_keys
//! transactions.rs  record_transaction, get_transaction, list_transactions,
//!                  link_transaction_input, transaction_inputs/spenders
//! inputs.rs        put/get/update/delete_available_inputs, versioned CAS
//! products.rs      upsert_product, get_product, list_products,
//!                  upsert_place, get_place, list_places
//! product_ids.rs   track_product_id, get_product_id, product_ids_owned_by
//! ```
//!
//! Every operation is one atomic unit against the database: a single
//! statement, or a single `BEGIN IMMEDIATE` transaction where the
//! operation touches more than one row (available inputs).

mod inputs;
mod keys;
mod product_ids;
mod products;
mod transactions;

use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::broadcast;

use crate::config::StoreConfig;
use crate::error::LedgerResult;
use crate::failures::{FailureChannel, FailureEvent};
use crate::metrics::StoreMetrics;
use crate::pool::ConnectionPool;

struct Inner {
    pool: ConnectionPool,
    metrics: StoreMetrics,
    failures: FailureChannel,
}

/// Ledger persistence handle.
///
/// Cheap to clone. There is no explicit shutdown; connections close when
/// the last clone is dropped.
#[derive(Clone)]
pub struct LedgerStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Opens the pool, bootstraps the schema and returns a ready store.
    ///
    /// Opening touches the filesystem, so it runs on the blocking pool.
    pub async fn open(config: StoreConfig) -> LedgerResult<Self> {
        let pool = tokio::task::spawn_blocking(move || ConnectionPool::open(&config))
            .await
            .map_err(|e| crate::LedgerError::Internal(format!("pool open task failed: {e}")))??;

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                metrics: StoreMetrics::new()?,
                failures: FailureChannel::new(),
            }),
        })
    }

    /// Private in-memory store. Mostly for tests.
    pub async fn open_in_memory() -> LedgerResult<Self> {
        Self::open(StoreConfig::in_memory()).await
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.inner.metrics
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Subscribes to failures of fire-and-forget operations.
    ///
    /// Only events published after subscribing are received.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureEvent> {
        self.inner.failures.subscribe()
    }

    /// Runs `f` on a pooled connection, timing and counting it under
    /// `operation`.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> LedgerResult<T> + Send + 'static,
    {
        let metrics = &self.inner.metrics;
        let timer = metrics.start_timer(operation);

        let in_flight = metrics.track_in_flight();
        let result = self.inner.pool.run(operation, f).await;
        drop(in_flight);

        timer.observe_duration();
        metrics.record(operation, &result);
        result
    }

    /// Publishes `result`'s error, if any, on the failure channel.
    fn report_failure<T>(&self, operation: &'static str, subject: &str, result: &LedgerResult<T>) {
        if let Err(e) = result {
            self.inner.failures.report(operation, subject, e);
        }
    }
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction and commits on success.
///
/// Taking the write lock up front lets SQLite's busy handler queue
/// concurrent writers instead of failing a read-to-write upgrade.
fn immediate<T>(
    conn: &mut Connection,
    f: impl FnOnce(&rusqlite::Transaction<'_>) -> LedgerResult<T>,
) -> LedgerResult<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[tokio::test]
    async fn clones_share_state() {
        let a = store().await;
        let b = a.clone();
        active_key(&a, "alice", "h1", "pub1").await;
        assert_eq!(b.get_public_key("h1").await.unwrap(), "pub1");
    }

    #[tokio::test]
    async fn operations_are_counted() {
        let store = store().await;
        let _ = store.get_public_key("nobody").await;
        let _ = store.get_public_key("nobody").await;

        let metrics = store.metrics();
        assert_eq!(metrics.operation_count("get_public_key", "not_found"), 2);
        assert_eq!(metrics.operations_in_flight.get(), 0);
    }

    #[tokio::test]
    async fn abandoned_operation_leaves_gauge_balanced() {
        let store = store().await;
        // Pin the only connection so the next operation waits for it.
        let held = store.pool().acquire().await.unwrap();

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            store.get_public_key("h1"),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(store.metrics().operations_in_flight.get(), 0);

        drop(held);
    }
}
