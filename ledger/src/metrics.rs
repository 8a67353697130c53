//! # Prometheus Metrics
//!
//! Operational metrics for the ledger store. Every operation is counted by
//! outcome and timed. All metrics live in a dedicated
//! [`prometheus::Registry`] owned by the store, so several stores in one
//! process (tests, mostly) never collide.

use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::error::{LedgerError, LedgerResult};

/// Holds all Prometheus metric handles for a store.
///
/// Clone-friendly; prometheus handles are reference counted internally.
#[derive(Clone)]
pub struct StoreMetrics {
    registry: Registry,
    /// Operations by name and outcome (`ok` or the error reason).
    pub operations_total: IntCounterVec,
    /// Operation latency in seconds, connection wait included.
    pub operation_duration_seconds: HistogramVec,
    /// Re-submitted transactions absorbed as no-ops.
    pub duplicate_transactions_total: IntCounter,
    /// Operations currently holding or waiting for a pooled connection.
    pub operations_in_flight: IntGauge,
}

impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics").finish_non_exhaustive()
    }
}

impl StoreMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> LedgerResult<Self> {
        let registry = Registry::new_custom(Some("traceledger".into()), None).map_err(metric_err)?;

        let operations_total = IntCounterVec::new(
            Opts::new(
                "store_operations_total",
                "Ledger store operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metric_err)?;
        registry
            .register(Box::new(operations_total.clone()))
            .map_err(metric_err)?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "store_operation_duration_seconds",
                "Ledger store operation latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation"],
        )
        .map_err(metric_err)?;
        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .map_err(metric_err)?;

        let duplicate_transactions_total = IntCounter::new(
            "store_duplicate_transactions_total",
            "Transactions re-submitted with an already recorded hash",
        )
        .map_err(metric_err)?;
        registry
            .register(Box::new(duplicate_transactions_total.clone()))
            .map_err(metric_err)?;

        let operations_in_flight = IntGauge::new(
            "store_operations_in_flight",
            "Store operations holding or waiting for a pooled connection",
        )
        .map_err(metric_err)?;
        registry
            .register(Box::new(operations_in_flight.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            operations_total,
            operation_duration_seconds,
            duplicate_transactions_total,
            operations_in_flight,
        })
    }

    pub(crate) fn start_timer(&self, operation: &str) -> HistogramTimer {
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .start_timer()
    }

    /// Counts one operation as in flight until the guard is dropped,
    /// including when the caller abandons the future mid-await.
    pub(crate) fn track_in_flight(&self) -> InFlightGuard {
        self.operations_in_flight.inc();
        InFlightGuard(self.operations_in_flight.clone())
    }

    pub(crate) fn record<T>(&self, operation: &str, result: &LedgerResult<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.reason(),
        };
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Count for one `(operation, outcome)` pair.
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> LedgerResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(metric_err)?;
        String::from_utf8(buffer)
            .map_err(|e| LedgerError::Internal(format!("metrics output is not utf-8: {e}")))
    }
}

pub(crate) struct InFlightGuard(IntGauge);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

fn metric_err(e: prometheus::Error) -> LedgerError {
    LedgerError::Internal(format!("metrics: {e}"))
}
