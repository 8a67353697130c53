//! Bulk recording of transactions from a JSON-lines file.
//!
//! Lines are parsed up front, then recorded with bounded concurrency.
//! Re-running an ingest over the same file is safe: already recorded hashes
//! come back as `already_recorded`, never as failures.

use std::path::Path;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;

use traceledger::{FailureEvent, LedgerStore, NewTransaction, RecordOutcome};

/// What an ingest run did.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub lines: usize,
    pub recorded: usize,
    pub already_recorded: usize,
    /// Lines that were not valid transaction JSON.
    pub malformed: usize,
    /// Transactions the store refused.
    pub failed: usize,
    pub failures: Vec<FailureEvent>,
}

/// Parses `contents` and records every transaction in it.
pub async fn ingest_lines(
    store: &LedgerStore,
    contents: &str,
    concurrency: usize,
) -> IngestSummary {
    let mut summary = IngestSummary::default();
    let mut txs = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;
        match serde_json::from_str::<NewTransaction>(line) {
            Ok(tx) => txs.push(tx),
            Err(e) => {
                summary.malformed += 1;
                tracing::warn!(line = index + 1, error = %e, "skipping malformed transaction");
            }
        }
    }

    let mut failures = store.subscribe_failures();

    let outcomes: Vec<_> = stream::iter(txs)
        .map(|tx| {
            let store = store.clone();
            async move { store.record_transaction(tx).await }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Ok(RecordOutcome::Recorded) => summary.recorded += 1,
            Ok(RecordOutcome::AlreadyRecorded) => summary.already_recorded += 1,
            Err(_) => summary.failed += 1,
        }
    }

    loop {
        match failures.try_recv() {
            Ok(event) => summary.failures.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "failure events dropped from summary");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    tracing::info!(
        lines = summary.lines,
        recorded = summary.recorded,
        already_recorded = summary.already_recorded,
        malformed = summary.malformed,
        failed = summary.failed,
        "ingest finished"
    );
    summary
}

/// Reads `path` and records every transaction in it.
pub async fn ingest_file(
    store: &LedgerStore,
    path: &Path,
    concurrency: usize,
) -> Result<IngestSummary> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(ingest_lines(store, &contents, concurrency).await)
}
