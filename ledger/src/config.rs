//! # Store Configuration & Constants
//!
//! Every tunable of the ledger store lives here. The binary builds a
//! [`StoreConfig`] from its command-line flags (which fall back to
//! environment variables); tests use [`StoreConfig::in_memory`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Default number of pooled connections for file-backed databases.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Upper bound on the pool size. SQLite serializes writers anyway; past
/// this point extra connections only cost file descriptors.
pub const MAX_POOL_SIZE: usize = 64;

/// How long a caller waits for a free connection before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a single statement (or statement group) to run.
/// Statements still running at the deadline are interrupted.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long SQLite itself retries on a locked database file before
/// reporting `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Schema & paging
// ---------------------------------------------------------------------------

/// Schema version written into `schema_meta` on bootstrap.
pub const SCHEMA_VERSION: u32 = 1;

/// Page size for listings when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Largest page a listing will return.
pub const MAX_PAGE_SIZE: u32 = 500;

// ---------------------------------------------------------------------------
// Failure channel
// ---------------------------------------------------------------------------

/// Capacity of the failure broadcast channel. Slow subscribers lag and
/// skip events rather than blocking the store.
pub const FAILURE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database. Gone when the store is dropped.
    InMemory,
    /// SQLite database file, created on first open.
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parses a location string. `:memory:` selects an in-memory database,
    /// anything else is treated as a file path.
    pub fn parse(s: &str) -> Self {
        if s == ":memory:" {
            DatabaseLocation::InMemory
        } else {
            DatabaseLocation::File(PathBuf::from(s))
        }
    }
}

impl fmt::Display for DatabaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, ":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Connection and timeout settings for a [`LedgerStore`](crate::LedgerStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: DatabaseLocation,
    /// Number of pooled connections. Forced to 1 for in-memory databases,
    /// because each in-memory connection would otherwise see its own
    /// empty database.
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: DatabaseLocation::InMemory,
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// In-memory database with default timeouts.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database at `path` with default pool size and timeouts.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The pool size the store will actually open.
    pub fn effective_pool_size(&self) -> usize {
        match self.location {
            DatabaseLocation::InMemory => 1,
            DatabaseLocation::File(_) => self.pool_size,
        }
    }

    /// Rejects settings the pool cannot work with.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(LedgerError::InvalidArgument(format!(
                "pool_size must be between 1 and {MAX_POOL_SIZE}, got {}",
                self.pool_size
            )));
        }
        if self.statement_timeout.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "statement_timeout must be non-zero".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(LedgerError::InvalidArgument(
                "acquire_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_forces_single_connection() {
        let config = StoreConfig::in_memory().with_pool_size(16);
        assert_eq!(config.effective_pool_size(), 1);

        let config = StoreConfig::file("/tmp/ledger.db").with_pool_size(16);
        assert_eq!(config.effective_pool_size(), 16);
    }

    #[test]
    fn parse_location() {
        assert_eq!(DatabaseLocation::parse(":memory:"), DatabaseLocation::InMemory);
        assert_eq!(
            DatabaseLocation::parse("data/ledger.db"),
            DatabaseLocation::File(PathBuf::from("data/ledger.db"))
        );
        assert_eq!(DatabaseLocation::InMemory.to_string(), ":memory:");
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::default().with_pool_size(0).validate().is_err());
        assert!(StoreConfig::default()
            .with_pool_size(MAX_POOL_SIZE + 1)
            .validate()
            .is_err());
        assert!(StoreConfig::default()
            .with_statement_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn timing_constants_sanity() {
        // A statement must be allowed to outlive SQLite's own busy retry.
        assert!(DEFAULT_BUSY_TIMEOUT <= DEFAULT_STATEMENT_TIMEOUT);
        assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
        assert!(DEFAULT_POOL_SIZE <= MAX_POOL_SIZE);
    }
}
