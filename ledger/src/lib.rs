// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TraceLedger — Ledger Store
//!
//! The persistence layer for a product traceability ledger. Three things
//! get stored here and nothing else:
//!
//! - **keys** — registered public keys of the actors in a supply chain,
//!   each with an approval status.
//! - **transactions** — signed transactions, recorded idempotently so that
//!   relayers can deliver them at-least-once without creating duplicates.
//! - **available inputs** — per `(key, product)` the ordered set of input
//!   documents a key may still consume in a later transaction.
//!
//! Signature checks and the business meaning of a transaction live upstream.
//! Callers hand this layer validated data; this layer keeps the storage
//! invariants (uniqueness, idempotent re-submission, atomic replacement of
//! the inputs sequence) and tells the caller exactly what happened.
//!
//! ## Architecture
//!
//! - **config** — Tunables and their defaults.
//! - **error** — `LedgerError` and the boundary classification of SQLite faults.
//! - **pool** — Bounded, timeout-aware pool of SQLite connections.
//! - **schema** — Table definitions and idempotent bootstrap.
//! - **types** — Rows and request types exchanged with callers.
//! - **failures** — Broadcast channel for failures of fire-and-forget calls.
//! - **metrics** — Prometheus counters and histograms for every operation.
//! - **store** — `LedgerStore`, the handle callers actually use.
//!
//! ## Quick Start
//!
//! ```ignore
//! let store = LedgerStore::open(StoreConfig::file("ledger.db")).await?;
//! store.register_key(NewKey::new("alice", "h1", "pub1")).await?;
//! store.activate_key("h1").await?;
//! assert_eq!(store.get_public_key("h1").await?, "pub1");
//! ```

pub mod config;
pub mod error;
pub mod failures;
pub mod metrics;
pub mod pool;
pub mod schema;
pub mod store;
pub mod types;

pub use config::{DatabaseLocation, StoreConfig};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use failures::FailureEvent;
pub use store::LedgerStore;
pub use types::{
    key_hash, AvailableInputs, InputDocument, Key, KeyStatus, NewKey, NewTransaction, Page, Place,
    PlaceKind, Product, ProductId, ProductMovement, RecordOutcome, Transaction,
};
