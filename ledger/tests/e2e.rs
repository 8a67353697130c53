//! End-to-end tests against file-backed stores.
//!
//! Each test opens its own database in a fresh temporary directory with a
//! multi-connection pool, so concurrent operations really run on separate
//! SQLite connections.

use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tempfile::TempDir;

use traceledger::{
    ErrorKind, KeyStatus, LedgerStore, NewKey, NewTransaction, Page, RecordOutcome, StoreConfig,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

async fn file_store(pool_size: usize) -> (LedgerStore, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::file(dir.path().join("ledger.db")).with_pool_size(pool_size);
    let store = LedgerStore::open(config).await.expect("open store");
    (store, dir)
}

fn transfer(hash: &str, from: &str, to: &str, timestamp: i64) -> NewTransaction {
    NewTransaction {
        hash: hash.to_string(),
        tx_type: 1,
        mode: 0,
        transmitter: from.to_string(),
        receiver: Some(to.to_string()),
        timestamp,
        data: json!({ "product": [["milk", 10]] }),
        sign: "3045022100".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn supply_chain_round_trip() {
    let (store, _dir) = file_store(4).await;

    store
        .register_key(NewKey::new("alice", "h1", "pub1"))
        .await
        .unwrap();
    store.register_key(NewKey::new("bob", "h2", "pub2")).await.unwrap();
    store.activate_key("h1").await.unwrap();
    store.activate_key("h2").await.unwrap();
    assert_eq!(store.get_public_key("h1").await.unwrap(), "pub1");

    let dup = store
        .register_key(NewKey::new("alice", "h1", "pub1"))
        .await
        .unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::DuplicateKey);

    // Mint then transfer; the transfer consumes the mint.
    let mut mint = transfer("t0", "h1", "h1", 1_700_000_000_000);
    mint.tx_type = 0;
    mint.receiver = None;
    assert_eq!(
        store.record_transaction(mint).await.unwrap(),
        RecordOutcome::Recorded
    );
    store
        .put_available_inputs("h1", "milk", vec![json!({ "tx": "t0", "quantity": 10 })])
        .await
        .unwrap();

    store
        .record_transaction(transfer("t1", "h1", "h2", 1_700_000_001_000))
        .await
        .unwrap();
    store.link_transaction_input("t1", "t0", "milk").await.unwrap();
    store
        .update_available_inputs("h1", "milk", vec![])
        .await
        .unwrap();
    store
        .put_available_inputs("h2", "milk", vec![json!({ "tx": "t1", "quantity": 10 })])
        .await
        .unwrap();

    assert_eq!(
        store.get_available_inputs("h1", "milk").await.unwrap(),
        Some(vec![])
    );
    assert_eq!(
        store.get_available_inputs("h2", "milk").await.unwrap(),
        Some(vec![json!({ "tx": "t1", "quantity": 10 })])
    );
    assert_eq!(store.transaction_spenders("t0", "milk").await.unwrap(), ["t1"]);

    let listed = store.list_transactions(Page::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].hash, "t1");

    store.deactivate_key("h2").await.unwrap();
    assert_eq!(store.get_public_key("h2").await.unwrap_err().reason(), "not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_recording_yields_one_row() {
    let (store, _dir) = file_store(4).await;
    let tx = transfer("t-race", "h1", "h2", 1_700_000_000_000);

    let outcomes = join_all((0..16).map(|_| {
        let store = store.clone();
        let tx = tx.clone();
        tokio::spawn(async move { store.record_transaction(tx).await })
    }))
    .await;

    let mut recorded = 0;
    for outcome in outcomes {
        match outcome.expect("task").expect("record") {
            RecordOutcome::Recorded => recorded += 1,
            RecordOutcome::AlreadyRecorded => {}
        }
    }
    assert_eq!(recorded, 1);
    assert_eq!(store.transaction_count().await.unwrap(), 1);
    assert_eq!(store.metrics().duplicate_transactions_total.get(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replacements_never_interleave() {
    let (store, _dir) = file_store(4).await;
    store
        .put_available_inputs("h1", "milk", vec![json!(0)])
        .await
        .unwrap();

    // Writer n replaces the sequence with n copies of n.
    let writes = join_all((1..=8i64).map(|n| {
        let store = store.clone();
        tokio::spawn(async move {
            let inputs = vec![json!(n); n as usize];
            store.update_available_inputs("h1", "milk", inputs).await
        })
    }))
    .await;
    for write in writes {
        assert!(write.expect("task").expect("update"));
    }

    // Last writer wins, as a whole.
    let stored = store
        .get_available_inputs_versioned("h1", "milk")
        .await
        .unwrap()
        .unwrap();
    let n = stored.inputs.len() as i64;
    assert!((1..=8).contains(&n));
    assert!(stored.inputs.iter().all(|v| *v == json!(n)));
    assert_eq!(stored.version, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn versioned_writers_lose_cleanly() {
    let (store, _dir) = file_store(4).await;
    store
        .put_available_inputs("h1", "milk", vec![json!("a")])
        .await
        .unwrap();

    // Every writer read version 1; exactly one may win.
    let attempts = join_all((0..6).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .replace_available_inputs_if_version("h1", "milk", 1, vec![json!(i)])
                .await
        })
    }))
    .await;

    let mut winners = 0;
    for attempt in attempts {
        match attempt.expect("task") {
            Ok(version) => {
                assert_eq!(version, 2);
                winners += 1;
            }
            Err(e) => assert_eq!(e.reason(), "version_conflict"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    {
        let store = LedgerStore::open(StoreConfig::file(&path)).await.unwrap();
        store
            .register_key(NewKey::new("alice", "h1", "pub1"))
            .await
            .unwrap();
        store
            .put_available_inputs("h1", "milk", vec![json!(1), json!(2)])
            .await
            .unwrap();
    }

    let store = LedgerStore::open(StoreConfig::file(&path)).await.unwrap();
    let key = store.get_key("h1").await.unwrap().unwrap();
    assert_eq!(key.status, KeyStatus::New);
    assert_eq!(
        store.get_available_inputs("h1", "milk").await.unwrap(),
        Some(vec![json!(1), json!(2)])
    );
}

#[tokio::test]
async fn exhausted_pool_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::file(dir.path().join("ledger.db"))
        .with_pool_size(1)
        .with_acquire_timeout(Duration::from_millis(100));
    let store = LedgerStore::open(config).await.unwrap();

    let held = store.pool().acquire().await.unwrap();
    let err = store.get_public_key("h1").await.unwrap_err();
    assert_eq!(err.reason(), "timeout");
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(store.metrics().operation_count("get_public_key", "timeout"), 1);

    drop(held);
    assert_eq!(store.get_public_key("h1").await.unwrap_err().reason(), "not_found");
}
