//! Key registration and lookup.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{immediate, LedgerStore};
use crate::error::{is_unique_violation, LedgerError, LedgerResult};
use crate::types::{Key, KeyStatus, NewKey, Page};

const KEY_COLUMNS: &str = "hash, name, public_key, status, description, registered_at";

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<Key> {
    Ok(Key {
        hash: row.get(0)?,
        name: row.get(1)?,
        public_key: row.get(2)?,
        status: row.get(3)?,
        description: row.get(4)?,
        registered_at: row.get(5)?,
    })
}

impl LedgerStore {
    /// Registers a key with status [`KeyStatus::New`].
    ///
    /// Uniqueness of the hash is left to the database; a second
    /// registration of the same hash fails with [`LedgerError::DuplicateKey`]
    /// and leaves the first row untouched.
    pub async fn register_key(&self, key: NewKey) -> LedgerResult<()> {
        let hash = key.hash.clone();
        let result = self
            .run("register_key", move |conn| {
                immediate(conn, |tx| {
                    tx.execute(
                        "INSERT INTO keys (hash, name, public_key, description, registered_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![key.hash, key.name, key.public_key, key.description, Utc::now()],
                    )
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            LedgerError::DuplicateKey(key.hash.clone())
                        } else {
                            e.into()
                        }
                    })?;
                    Ok(())
                })
            })
            .await;

        match &result {
            Ok(()) => tracing::debug!(key_hash = %hash, "key registered"),
            Err(LedgerError::DuplicateKey(_)) => {
                tracing::debug!(key_hash = %hash, "key already registered")
            }
            Err(e) => tracing::error!(key_hash = %hash, error = %e, "key registration failed"),
        }
        result
    }

    /// Public key of an **active** key.
    ///
    /// Pending, inactive and unknown hashes all yield
    /// [`LedgerError::NotFound`]; use [`get_key`](Self::get_key) to tell
    /// them apart.
    pub async fn get_public_key(&self, key_hash: &str) -> LedgerResult<String> {
        let key_hash = key_hash.to_string();
        self.run("get_public_key", move |conn| {
            let public_key: Option<String> = conn
                .query_row(
                    "SELECT public_key FROM keys WHERE hash = ?1 AND status = ?2",
                    params![key_hash, KeyStatus::Active],
                    |row| row.get(0),
                )
                .optional()?;
            public_key.ok_or(LedgerError::NotFound(key_hash))
        })
        .await
    }

    /// The full key row, whatever its status.
    pub async fn get_key(&self, key_hash: &str) -> LedgerResult<Option<Key>> {
        let key_hash = key_hash.to_string();
        self.run("get_key", move |conn| {
            let sql = format!("SELECT {KEY_COLUMNS} FROM keys WHERE hash = ?1");
            Ok(conn.query_row(&sql, params![key_hash], key_from_row).optional()?)
        })
        .await
    }

    /// Looks a key up by hash, falling back to its name.
    ///
    /// An exact hash match wins over a key whose name happens to equal the
    /// query. Several keys may share a name; the lowest hash is returned.
    pub async fn find_key(&self, hash_or_name: &str) -> LedgerResult<Option<Key>> {
        let query = hash_or_name.to_string();
        self.run("find_key", move |conn| {
            let sql = format!(
                "SELECT {KEY_COLUMNS} FROM keys WHERE hash = ?1 OR name = ?1
                 ORDER BY hash = ?1 DESC, hash LIMIT 1"
            );
            Ok(conn.query_row(&sql, params![query], key_from_row).optional()?)
        })
        .await
    }

    /// Sets the status of an existing key.
    pub async fn set_key_status(&self, key_hash: &str, status: KeyStatus) -> LedgerResult<()> {
        let key_hash = key_hash.to_string();
        let subject = key_hash.clone();
        self.run("set_key_status", move |conn| {
            immediate(conn, |tx| {
                let changed = tx.execute(
                    "UPDATE keys SET status = ?2 WHERE hash = ?1",
                    params![key_hash, status],
                )?;
                if changed == 0 {
                    return Err(LedgerError::NotFound(key_hash));
                }
                Ok(())
            })
        })
        .await?;

        tracing::info!(key_hash = %subject, %status, "key status changed");
        Ok(())
    }

    pub async fn activate_key(&self, key_hash: &str) -> LedgerResult<()> {
        self.set_key_status(key_hash, KeyStatus::Active).await
    }

    pub async fn deactivate_key(&self, key_hash: &str) -> LedgerResult<()> {
        self.set_key_status(key_hash, KeyStatus::Inactive).await
    }

    /// Deletes a key that has never been approved.
    ///
    /// Keys that were ever activated stay, since transactions may reference
    /// them; those fail with [`LedgerError::KeyNotPending`].
    pub async fn remove_key(&self, key_hash: &str) -> LedgerResult<()> {
        let key_hash = key_hash.to_string();
        self.run("remove_key", move |conn| {
            immediate(conn, |tx| {
                let removed = tx.execute(
                    "DELETE FROM keys WHERE hash = ?1 AND status = ?2",
                    params![key_hash, KeyStatus::New],
                )?;
                if removed == 1 {
                    tracing::info!(key_hash = %key_hash, "pending key removed");
                    return Ok(());
                }

                let exists: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM keys WHERE hash = ?1)",
                    params![key_hash],
                    |row| row.get(0),
                )?;
                if exists {
                    Err(LedgerError::KeyNotPending(key_hash))
                } else {
                    Err(LedgerError::NotFound(key_hash))
                }
            })
        })
        .await
    }

    /// Keys with `status`, ordered by name then hash.
    pub async fn list_keys(&self, status: KeyStatus, page: Page) -> LedgerResult<Vec<Key>> {
        let (limit, offset) = page.sql_bounds();
        self.run("list_keys", move |conn| {
            let sql = format!(
                "SELECT {KEY_COLUMNS} FROM keys WHERE status = ?1
                 ORDER BY name, hash LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let keys = stmt
                .query_map(params![status, limit, offset], key_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
