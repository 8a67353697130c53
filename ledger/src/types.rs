//! Row and request types exchanged between callers and the store.
//!
//! Request types (`NewKey`, `NewTransaction`) carry what the caller
//! supplies; row types (`Key`, `Transaction`, `AvailableInputs`) carry what
//! the store hands back, including store-assigned fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{LedgerError, LedgerResult};

/// One structured input document. Opaque to the store.
pub type InputDocument = serde_json::Value;

/// SHA-256 hex digest of a public key's text, the canonical key hash.
pub fn key_hash(public_key: &str) -> String {
    hex::encode(Sha256::digest(public_key.as_bytes()))
}

/// Converts caller-supplied epoch milliseconds into a UTC timestamp.
pub(crate) fn timestamp_from_millis(millis: i64) -> LedgerResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        LedgerError::InvalidArgument(format!("timestamp {millis} ms is out of range"))
    })
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Approval status of a registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Registered, waiting for approval. Default for new registrations.
    New,
    /// Approved; its public key is served by `get_public_key`.
    Active,
    /// Revoked.
    Inactive,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(LedgerError::InvalidArgument(format!(
                "unknown key status: {other}"
            ))),
        }
    }
}

impl ToSql for KeyStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for KeyStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
    }
}

/// A key registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKey {
    pub name: String,
    pub hash: String,
    pub public_key: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewKey {
    pub fn new(
        name: impl Into<String>,
        hash: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            public_key: public_key.into(),
            description: None,
        }
    }

    /// Registration whose hash is derived from the public key with [`key_hash`].
    pub fn from_public_key(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        let public_key = public_key.into();
        let hash = key_hash(&public_key);
        Self::new(name, hash, public_key)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A stored key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub hash: String,
    pub name: String,
    pub public_key: String,
    pub status: KeyStatus,
    pub description: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl Key {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// A signed transaction as submitted by an upstream relayer.
///
/// `timestamp` is the client's clock in epoch milliseconds. `receiver` is
/// absent for transactions that have no counterparty (e.g. minting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: i64,
    pub mode: i64,
    pub transmitter: String,
    #[serde(default)]
    pub receiver: Option<String>,
    pub timestamp: i64,
    pub data: serde_json::Value,
    pub sign: String,
}

/// A stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    #[serde(rename = "type")]
    pub tx_type: i64,
    pub mode: i64,
    pub transmitter: String,
    pub receiver: Option<String>,
    pub client_timestamp: DateTime<Utc>,
    /// The epoch milliseconds exactly as the client sent them.
    pub raw_client_timestamp: i64,
    /// When this store first recorded the transaction.
    pub server_timestamp: DateTime<Utc>,
    pub transaction_data: serde_json::Value,
    pub sign: String,
}

/// Result of [`LedgerStore::record_transaction`](crate::LedgerStore::record_transaction).
///
/// Both variants are success: re-delivery of a known hash is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
}

// ---------------------------------------------------------------------------
// Available inputs
// ---------------------------------------------------------------------------

/// The stored input sequence for one `(key_hash, product)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableInputs {
    pub key_hash: String,
    pub product: String,
    pub inputs: Vec<InputDocument>,
    /// Starts at 1, incremented by every replacement.
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// A product catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub name: String,
    pub measure_unit: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: i64,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_multiplier() -> i64 {
    1
}

impl Product {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        measure_unit: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            measure_unit: measure_unit.into(),
            multiplier: default_multiplier(),
            description: None,
        }
    }
}

/// The two place catalogs. Both have the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    Origin,
    Destination,
}

impl PlaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Destination => "destination",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Origin => "origins",
            Self::Destination => "destinations",
        }
    }
}

impl fmt::Display for PlaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An origin or destination catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Place {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Product ids
// ---------------------------------------------------------------------------

/// A transaction moving one identified product unit.
///
/// `owner` is the key now holding the unit; `destination` is set once the
/// unit leaves the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMovement {
    pub id: String,
    pub product: String,
    pub transaction: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

/// Custody record of one identified product unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductId {
    pub id: String,
    pub product: String,
    /// The transaction that first produced the unit. Never changes.
    pub first_transaction: String,
    pub last_transaction: String,
    pub owner: Option<String>,
    pub destination: Option<String>,
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

/// A window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Page {
    /// 1-based page `number` of `size` rows. `size` is clamped to
    /// `1..=MAX_PAGE_SIZE`, page 0 is treated as page 1.
    pub fn numbered(number: u64, size: u32) -> Self {
        let limit = size.clamp(1, MAX_PAGE_SIZE);
        Self {
            limit,
            offset: number.saturating_sub(1).saturating_mul(u64::from(limit)),
        }
    }

    /// SQLite binds integers as i64.
    pub(crate) fn sql_bounds(&self) -> (i64, i64) {
        (
            i64::from(self.limit),
            i64::try_from(self.offset).unwrap_or(i64::MAX),
        )
    }
}
