//! Transaction recording, lookup and input links.
//!
//! Recording is idempotent on the transaction hash: upstream relayers
//! deliver at-least-once, so a known hash is a successful no-op, never an
//! error, and never a second row.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::{immediate, LedgerStore};
use crate::error::{is_unique_violation, LedgerResult};
use crate::types::{timestamp_from_millis, NewTransaction, Page, RecordOutcome, Transaction};

const TX_COLUMNS: &str = "hash, type, mode, transmitter, receiver, client_timestamp, \
                          raw_client_timestamp, server_timestamp, transaction_data, sign";

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        hash: row.get(0)?,
        tx_type: row.get(1)?,
        mode: row.get(2)?,
        transmitter: row.get(3)?,
        receiver: row.get(4)?,
        client_timestamp: row.get(5)?,
        raw_client_timestamp: row.get(6)?,
        server_timestamp: row.get(7)?,
        transaction_data: json_column(row, 8)?,
        sign: row.get(9)?,
    })
}

/// Reads a column written as JSON text.
fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl LedgerStore {
    /// Records a transaction.
    ///
    /// Returns [`RecordOutcome::AlreadyRecorded`] when the hash is already
    /// stored; the stored row is left as it was. Any other failure is
    /// reported on the failure channel as well as returned, since most
    /// callers fire this and move on.
    pub async fn record_transaction(&self, tx: NewTransaction) -> LedgerResult<RecordOutcome> {
        let hash = tx.hash.clone();

        // JSON is bound as text, so a `null` payload stays JSON `null`.
        let prepared = timestamp_from_millis(tx.timestamp)
            .and_then(|ts| Ok((ts, serde_json::to_string(&tx.data)?)));

        let result = match prepared {
            Ok((client_timestamp, data)) => {
                self.run("record_transaction", move |conn| {
                    immediate(conn, |db| {
                        let inserted = db.execute(
                            "INSERT INTO transactions (
                                hash, type, mode, transmitter, receiver, client_timestamp,
                                raw_client_timestamp, server_timestamp, transaction_data, sign
                             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                            params![
                                tx.hash,
                                tx.tx_type,
                                tx.mode,
                                tx.transmitter,
                                tx.receiver,
                                client_timestamp,
                                tx.timestamp,
                                Utc::now(),
                                data,
                                tx.sign,
                            ],
                        );
                        match inserted {
                            Ok(_) => Ok(RecordOutcome::Recorded),
                            Err(e) if is_unique_violation(&e) => Ok(RecordOutcome::AlreadyRecorded),
                            Err(e) => Err(e.into()),
                        }
                    })
                })
                .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(RecordOutcome::Recorded) => tracing::debug!(tx_hash = %hash, "transaction recorded"),
            Ok(RecordOutcome::AlreadyRecorded) => {
                self.metrics().duplicate_transactions_total.inc();
                tracing::debug!(tx_hash = %hash, "transaction already recorded, ignoring");
            }
            Err(_) => self.report_failure("record_transaction", &hash, &result),
        }
        result
    }

    pub async fn get_transaction(&self, tx_hash: &str) -> LedgerResult<Option<Transaction>> {
        let tx_hash = tx_hash.to_string();
        self.run("get_transaction", move |conn| {
            let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE hash = ?1");
            Ok(conn
                .query_row(&sql, params![tx_hash], transaction_from_row)
                .optional()?)
        })
        .await
    }

    /// Transactions, newest client timestamp first.
    pub async fn list_transactions(&self, page: Page) -> LedgerResult<Vec<Transaction>> {
        let (limit, offset) = page.sql_bounds();
        self.run("list_transactions", move |conn| {
            let sql = format!(
                "SELECT {TX_COLUMNS} FROM transactions
                 ORDER BY raw_client_timestamp DESC, hash LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let txs = stmt
                .query_map(params![limit, offset], transaction_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(txs)
        })
        .await
    }

    pub async fn transaction_count(&self) -> LedgerResult<u64> {
        self.run("transaction_count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| {
                row.get(0)
            })?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Records that `t_hash` consumed `input` for `product`.
    ///
    /// Idempotent; returns `false` when the link already existed.
    pub async fn link_transaction_input(
        &self,
        t_hash: &str,
        input: &str,
        product: &str,
    ) -> LedgerResult<bool> {
        let (t_hash, input, product) = (t_hash.to_string(), input.to_string(), product.to_string());
        self.run("link_transaction_input", move |conn| {
            immediate(conn, |db| {
                match db.execute(
                    "INSERT INTO transaction_inputs (t_hash, input, product) VALUES (?1, ?2, ?3)",
                    params![t_hash, input, product],
                ) {
                    Ok(_) => Ok(true),
                    Err(e) if is_unique_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
        })
        .await
    }

    /// Hashes of the transactions `t_hash` consumed for `product`.
    pub async fn transaction_inputs(
        &self,
        t_hash: &str,
        product: &str,
    ) -> LedgerResult<Vec<String>> {
        let (t_hash, product) = (t_hash.to_string(), product.to_string());
        self.run("transaction_inputs", move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT input FROM transaction_inputs
                 WHERE t_hash = ?1 AND product = ?2 ORDER BY input",
            )?;
            let hashes = stmt
                .query_map(params![t_hash, product], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(hashes)
        })
        .await
    }

    /// Hashes of the transactions that consumed `input` for `product`.
    pub async fn transaction_spenders(
        &self,
        input: &str,
        product: &str,
    ) -> LedgerResult<Vec<String>> {
        let (input, product) = (input.to_string(), product.to_string());
        self.run("transaction_spenders", move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT t_hash FROM transaction_inputs
                 WHERE input = ?1 AND product = ?2 ORDER BY t_hash",
            )?;
            let hashes = stmt
                .query_map(params![input, product], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(hashes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::*;
    use crate::types::{Page, RecordOutcome};

    #[tokio::test]
    async fn recording_twice_is_a_silent_no_op() {
        let store = store().await;
        let first = tx("t1", 1_700_000_000_000);

        assert_eq!(
            store.record_transaction(first.clone()).await.unwrap(),
            RecordOutcome::Recorded
        );

        // Same hash, different payload: the original row wins.
        let mut replay = first.clone();
        replay.sign = "cafebabe".to_string();
        assert_eq!(
            store.record_transaction(replay).await.unwrap(),
            RecordOutcome::AlreadyRecorded
        );

        assert_eq!(store.transaction_count().await.unwrap(), 1);
        let stored = store.get_transaction("t1").await.unwrap().unwrap();
        assert_eq!(stored.sign, "deadbeef");
        assert_eq!(store.metrics().duplicate_transactions_total.get(), 1);
    }

    #[tokio::test]
    async fn stored_fields_roundtrip() {
        let store = store().await;
        let mut mint = tx("mint-1", 1_700_000_000_123);
        mint.receiver = None;
        mint.data = serde_json::json!({ "product": [["milk", 100]], "new_id": "lot-7" });
        store.record_transaction(mint.clone()).await.unwrap();

        let stored = store.get_transaction("mint-1").await.unwrap().unwrap();
        assert_eq!(stored.receiver, None);
        assert_eq!(stored.raw_client_timestamp, 1_700_000_000_123);
        assert_eq!(stored.client_timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(stored.transaction_data, mint.data);
        assert_eq!(stored.tx_type, mint.tx_type);
        assert!(stored.server_timestamp >= stored.client_timestamp);
    }

    #[tokio::test]
    async fn out_of_range_timestamp_is_reported() {
        let store = store().await;
        let mut failures = store.subscribe_failures();

        let err = store
            .record_transaction(tx("t-bad", i64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_argument");

        let event = failures.recv().await.unwrap();
        assert_eq!(event.operation, "record_transaction");
        assert_eq!(event.subject, "t-bad");
        assert!(store.get_transaction("t-bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_newest_first() {
        let store = store().await;
        for (hash, ts) in [("a", 3_000), ("b", 1_000), ("c", 2_000)] {
            store.record_transaction(tx(hash, ts)).await.unwrap();
        }

        let all = store.list_transactions(Page::default()).await.unwrap();
        let hashes: Vec<_> = all.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, ["a", "c", "b"]);

        let page2 = store.list_transactions(Page::numbered(2, 2)).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].hash, "b");
    }

    #[tokio::test]
    async fn input_links_are_idempotent_and_bidirectional() {
        let store = store().await;
        assert!(store.link_transaction_input("t2", "t1", "milk").await.unwrap());
        assert!(!store.link_transaction_input("t2", "t1", "milk").await.unwrap());
        assert!(store.link_transaction_input("t3", "t1", "milk").await.unwrap());
        assert!(store.link_transaction_input("t3", "t0", "cheese").await.unwrap());

        assert_eq!(store.transaction_inputs("t3", "milk").await.unwrap(), ["t1"]);
        assert_eq!(
            store.transaction_spenders("t1", "milk").await.unwrap(),
            ["t2", "t3"]
        );
        assert!(store.transaction_spenders("t1", "cheese").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_payload_is_kept_as_json() {
        let store = store().await;
        let mut empty = tx("t-null", 1_700_000_000_000);
        empty.data = serde_json::Value::Null;
        store.record_transaction(empty).await.unwrap();

        let stored = store.get_transaction("t-null").await.unwrap().unwrap();
        assert_eq!(stored.transaction_data, serde_json::Value::Null);
    }
}
