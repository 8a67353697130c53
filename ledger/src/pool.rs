//! # Connection Pool
//!
//! A bounded pool of SQLite connections shared by every store operation.
//!
//! ```text
//!   caller ──acquire()──▶ semaphore permit ──▶ idle Vec<Connection>
//!                                                   │ pop
//!                                                   ▼
//!                                   PooledConnection (owns Connection)
//!                                                   │ spawn_blocking
//!                                                   ▼
//!                                         statement runs off-runtime
//!                                                   │ drop
//!                                                   ▼
//!                                  connection pushed back, permit released
//! ```
//!
//! The semaphore bounds concurrent use; the idle list holds connections not
//! currently checked out. A permit guarantees the idle list is non-empty.
//! Release happens in `Drop`, so connections come back on every path,
//! including panics inside the statement closure.
//!
//! Statements run on tokio's blocking pool and are bounded by the
//! configured statement timeout. When the deadline passes, the statement is
//! interrupted through SQLite's interrupt handle and the caller gets
//! [`LedgerError::Timeout`].

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{DatabaseLocation, StoreConfig};
use crate::error::{is_interrupted, LedgerError, LedgerResult};
use crate::schema;

// ---------------------------------------------------------------------------
// PooledConnection
// ---------------------------------------------------------------------------

/// A connection checked out of the pool.
///
/// Derefs to [`rusqlite::Connection`]. Returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    idle: Arc<Mutex<Vec<Connection>>>,
    // Dropped after `Drop::drop` runs, so the connection is back in the
    // idle list before the next waiter is woken.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.idle.lock().push(conn);
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionPool
// ---------------------------------------------------------------------------

/// Bounded pool of SQLite connections.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    idle: Arc<Mutex<Vec<Connection>>>,
    semaphore: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
    statement_timeout: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .field("acquire_timeout", &self.acquire_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl ConnectionPool {
    /// Opens every connection up front and bootstraps the schema.
    ///
    /// The schema is created through the first connection before the
    /// others are opened, so concurrent bootstrap never races.
    pub fn open(config: &StoreConfig) -> LedgerResult<Self> {
        config.validate()?;
        let size = config.effective_pool_size();

        let mut connections = Vec::with_capacity(size);
        for i in 0..size {
            let conn = open_connection(config)?;
            if i == 0 {
                schema::init_schema(&conn)?;
            }
            connections.push(conn);
        }

        tracing::info!(
            location = %config.location,
            size,
            "connection pool opened"
        );

        Ok(Self {
            idle: Arc::new(Mutex::new(connections)),
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout: config.acquire_timeout,
            statement_timeout: config.statement_timeout,
        })
    }

    /// Waits up to the acquire timeout for a free connection.
    pub async fn acquire(&self) -> LedgerResult<PooledConnection> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| LedgerError::Timeout {
            operation: "pool acquire",
            after: self.acquire_timeout,
        })?
        .map_err(|_| LedgerError::PoolClosed)?;

        let conn = self.idle.lock().pop().ok_or_else(|| {
            LedgerError::Internal("no idle connection despite holding a permit".to_string())
        })?;

        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Runs `f` against a pooled connection on the blocking thread pool.
    ///
    /// The whole call, connection wait excluded, is bounded by the statement
    /// timeout. On expiry the statement is interrupted and `operation` is
    /// reported in the timeout error.
    pub async fn run<T, F>(&self, operation: &'static str, f: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> LedgerResult<T> + Send + 'static,
    {
        let mut conn = self.acquire().await?;
        let interrupt = conn.get_interrupt_handle();
        // True while the closure owns the connection. The timeout path only
        // interrupts under this lock, so it can never hit a connection that
        // has already gone back to the pool and been handed to someone else.
        let running = Arc::new(Mutex::new(true));
        let running_task = Arc::clone(&running);

        let task = tokio::task::spawn_blocking(move || {
            let result = f(&mut *conn);
            *running_task.lock() = false;
            drop(conn);
            result
        });

        match tokio::time::timeout(self.statement_timeout, task).await {
            Ok(Ok(Err(LedgerError::Sqlite(e)))) if is_interrupted(&e) => Err(LedgerError::Timeout {
                operation,
                after: self.statement_timeout,
            }),
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LedgerError::Internal(format!(
                "{operation} task failed: {join_err}"
            ))),
            Err(_) => {
                let still_running = running.lock();
                if *still_running {
                    interrupt.interrupt();
                }
                drop(still_running);
                tracing::warn!(
                    operation,
                    timeout = ?self.statement_timeout,
                    "statement timed out, interrupted"
                );
                Err(LedgerError::Timeout {
                    operation,
                    after: self.statement_timeout,
                })
            }
        }
    }

    /// Total number of connections.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }
}

/// Opens and configures one connection.
fn open_connection(config: &StoreConfig) -> LedgerResult<Connection> {
    let conn = match &config.location {
        DatabaseLocation::InMemory => Connection::open_in_memory()?,
        DatabaseLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::InvalidArgument(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                tracing::warn!(%mode, "database did not switch to WAL journal mode");
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn
        }
    };

    conn.busy_timeout(config.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(config: StoreConfig) -> ConnectionPool {
        ConnectionPool::open(&config).expect("pool should open")
    }

    #[tokio::test]
    async fn connection_returns_on_drop() {
        let pool = pool_with(StoreConfig::in_memory());
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 1);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(conn);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = pool_with(
            StoreConfig::in_memory().with_acquire_timeout(Duration::from_millis(20)),
        );
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.reason(), "timeout");
    }

    #[tokio::test]
    async fn run_returns_closure_result_and_releases() {
        let pool = pool_with(StoreConfig::in_memory());
        let answer: i64 = pool
            .run("select", |conn| {
                Ok(conn.query_row("SELECT 40 + 2", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(answer, 42);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn errors_inside_run_release_the_connection() {
        let pool = pool_with(StoreConfig::in_memory());
        let err = pool
            .run("bad", |conn| {
                conn.execute("SELECT * FROM no_such_table", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn long_statement_is_interrupted() {
        let pool = pool_with(
            StoreConfig::in_memory().with_statement_timeout(Duration::from_millis(50)),
        );
        let err = pool
            .run("spin", |conn| {
                // Unbounded recursive CTE; only an interrupt stops it.
                let n: i64 = conn.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                     SELECT count(*) FROM c",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "timeout");

        // The interrupted connection comes back and is usable.
        let conn = pool.acquire().await.unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn file_pool_opens_all_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool =
            pool_with(StoreConfig::file(dir.path().join("nested/ledger.db")).with_pool_size(3));
        assert_eq!(pool.size(), 3);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop((a, b, c));
        assert_eq!(pool.available(), 3);
    }
}
