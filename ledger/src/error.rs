//! Error types for the ledger store.
//!
//! Every store operation returns [`LedgerResult`]. Classification happens
//! here, at the storage boundary: SQLite's unique-constraint signal becomes a
//! specific duplicate variant, everything else collapses into a storage
//! error. Callers that only need a coarse answer use [`LedgerError::kind`]
//! or the short [`LedgerError::reason`] string.

use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateKey,
    DuplicateInputs,
    NotFound,
    Conflict,
    InvalidArgument,
    Storage,
}

/// Errors that can occur during ledger store operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A key with this hash is already registered.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// An available-inputs row already exists for this key and product.
    #[error("available inputs already recorded for key {key_hash}, product {product}")]
    DuplicateInputs { key_hash: String, product: String },

    /// The looked-up entity does not exist (or, for public keys, is not active).
    #[error("not found: {0}")]
    NotFound(String),

    /// Only keys still pending approval may be removed.
    #[error("key {0} is no longer pending and cannot be removed")]
    KeyNotPending(String),

    /// Compare-and-swap on available inputs saw a different version.
    #[error("version conflict on {key_hash}/{product}: expected {expected}, found {found}")]
    VersionConflict {
        key_hash: String,
        product: String,
        expected: u64,
        found: u64,
    },

    /// A caller-supplied argument or configuration value is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The statement or pool acquisition did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection pool has been shut down.
    #[error("connection pool closed")]
    PoolClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::DuplicateInputs { .. } => ErrorKind::DuplicateInputs,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::KeyNotPending(_) | Self::VersionConflict { .. } => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Timeout { .. }
            | Self::Sqlite(_)
            | Self::Serialization(_)
            | Self::PoolClosed
            | Self::Internal(_) => ErrorKind::Storage,
        }
    }

    /// Short, stable reason string for callers that branch on failures
    /// without matching the enum (e.g. when forwarding over a wire).
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DuplicateKey(_) => "duplicate_key",
            Self::DuplicateInputs { .. } => "duplicate_inputs",
            Self::NotFound(_) => "not_found",
            Self::KeyNotPending(_) => "key_not_pending",
            Self::VersionConflict { .. } => "version_conflict",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Timeout { .. } => "timeout",
            Self::Sqlite(_) | Self::Serialization(_) | Self::PoolClosed | Self::Internal(_) => {
                "storage_error"
            }
        }
    }

    pub fn is_storage(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

/// True when `err` is SQLite reporting a PRIMARY KEY or UNIQUE violation.
///
/// Other constraint failures (CHECK, NOT NULL, FOREIGN KEY) stay generic.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

/// True when the statement was cut short by `sqlite3_interrupt`.
pub(crate) fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}
