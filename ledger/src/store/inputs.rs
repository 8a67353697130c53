//! Available inputs per `(key_hash, product)`.
//!
//! The sequence is always written whole: callers read it, compute the new
//! sequence and write it back. Concurrent writers race and the last commit
//! wins. Callers that need read-modify-write safety use
//! [`LedgerStore::get_available_inputs_versioned`] together with
//! [`LedgerStore::replace_available_inputs_if_version`].
//!
//! Each element is stored as its own row in `available_input_items`, keyed
//! by position, never as one opaque array.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{immediate, LedgerStore};
use crate::error::{is_unique_violation, LedgerError, LedgerResult};
use crate::types::{AvailableInputs, InputDocument};

/// Replaces every item of the pair with `inputs`, in order.
fn write_items(
    db: &rusqlite::Transaction<'_>,
    key_hash: &str,
    product: &str,
    inputs: &[InputDocument],
) -> LedgerResult<()> {
    db.execute(
        "DELETE FROM available_input_items WHERE key_hash = ?1 AND product = ?2",
        params![key_hash, product],
    )?;

    let mut insert = db.prepare_cached(
        "INSERT INTO available_input_items (key_hash, product, position, document)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, document) in inputs.iter().enumerate() {
        // Bound as JSON text so `null` elements stay JSON, not SQL NULL.
        let document = serde_json::to_string(document)?;
        insert.execute(params![key_hash, product, position as i64, document])?;
    }
    Ok(())
}

/// Bumps the version of an existing pair and rewrites its items.
/// Returns the new version, or `None` if the pair has no row.
fn replace_items(
    db: &rusqlite::Transaction<'_>,
    key_hash: &str,
    product: &str,
    inputs: &[InputDocument],
) -> LedgerResult<Option<u64>> {
    let version: Option<i64> = db
        .query_row(
            "UPDATE available_inputs SET version = version + 1, updated_at = ?3
             WHERE key_hash = ?1 AND product = ?2
             RETURNING version",
            params![key_hash, product, Utc::now()],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        Some(version) => {
            write_items(db, key_hash, product, inputs)?;
            Ok(Some(version as u64))
        }
        None => Ok(None),
    }
}

fn subject(key_hash: &str, product: &str) -> String {
    format!("{key_hash}/{product}")
}

impl LedgerStore {
    /// Creates the inputs row for a pair.
    ///
    /// Fails with [`LedgerError::DuplicateInputs`] if the pair already has a
    /// row; use [`update_available_inputs`](Self::update_available_inputs)
    /// to replace it. Failures are also reported on the failure channel.
    pub async fn put_available_inputs(
        &self,
        key_hash: &str,
        product: &str,
        inputs: Vec<InputDocument>,
    ) -> LedgerResult<()> {
        let subject = subject(key_hash, product);
        let (key_hash, product) = (key_hash.to_string(), product.to_string());
        let count = inputs.len();

        let result = self
            .run("put_available_inputs", move |conn| {
                immediate(conn, |db| {
                    db.execute(
                        "INSERT INTO available_inputs (key_hash, product, version, updated_at)
                         VALUES (?1, ?2, 1, ?3)",
                        params![key_hash, product, Utc::now()],
                    )
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            LedgerError::DuplicateInputs {
                                key_hash: key_hash.clone(),
                                product: product.clone(),
                            }
                        } else {
                            e.into()
                        }
                    })?;
                    write_items(db, &key_hash, &product, &inputs)
                })
            })
            .await;

        match &result {
            Ok(()) => tracing::debug!(%subject, count, "available inputs created"),
            Err(_) => self.report_failure("put_available_inputs", &subject, &result),
        }
        result
    }

    /// The stored sequence, or `None` if the pair was never written (or was
    /// deleted). An empty stored sequence is `Some(vec![])`.
    pub async fn get_available_inputs(
        &self,
        key_hash: &str,
        product: &str,
    ) -> LedgerResult<Option<Vec<InputDocument>>> {
        Ok(self
            .get_available_inputs_versioned(key_hash, product)
            .await?
            .map(|row| row.inputs))
    }

    /// The stored sequence together with its version.
    pub async fn get_available_inputs_versioned(
        &self,
        key_hash: &str,
        product: &str,
    ) -> LedgerResult<Option<AvailableInputs>> {
        let (key_hash, product) = (key_hash.to_string(), product.to_string());
        self.run("get_available_inputs", move |conn| {
            // One statement, so the version and the items come from the
            // same snapshot.
            let mut stmt = conn.prepare_cached(
                "SELECT a.version, i.position, i.document
                 FROM available_inputs a
                 LEFT JOIN available_input_items i
                   ON i.key_hash = a.key_hash AND i.product = a.product
                 WHERE a.key_hash = ?1 AND a.product = ?2
                 ORDER BY i.position",
            )?;
            let mut rows = stmt.query(params![key_hash, product])?;

            let mut found: Option<AvailableInputs> = None;
            while let Some(row) = rows.next()? {
                let version: i64 = row.get(0)?;
                // A row without items still yields one joined row, with
                // NULL item columns.
                let position: Option<i64> = row.get(1)?;
                let entry = found.get_or_insert_with(|| AvailableInputs {
                    key_hash: key_hash.clone(),
                    product: product.clone(),
                    inputs: Vec::new(),
                    version: version as u64,
                });
                if position.is_some() {
                    let document: String = row.get(2)?;
                    entry.inputs.push(serde_json::from_str(&document)?);
                }
            }
            Ok(found)
        })
        .await
    }

    /// Overwrites the stored sequence with `inputs`. Never merges.
    ///
    /// Returns `false` (and creates nothing) when the pair has no row.
    /// Failures are also reported on the failure channel.
    pub async fn update_available_inputs(
        &self,
        key_hash: &str,
        product: &str,
        inputs: Vec<InputDocument>,
    ) -> LedgerResult<bool> {
        let subject = subject(key_hash, product);
        let (key_hash, product) = (key_hash.to_string(), product.to_string());
        let count = inputs.len();

        let result = self
            .run("update_available_inputs", move |conn| {
                immediate(conn, |db| replace_items(db, &key_hash, &product, &inputs))
            })
            .await
            .map(|version| version.is_some());

        match &result {
            Ok(true) => tracing::debug!(%subject, count, "available inputs replaced"),
            Ok(false) => tracing::debug!(%subject, "no available inputs to replace"),
            Err(_) => self.report_failure("update_available_inputs", &subject, &result),
        }
        result
    }

    /// Replaces the sequence only if the stored version is still `expected`.
    ///
    /// Returns the new version. Fails with [`LedgerError::NotFound`] when the
    /// pair has no row and [`LedgerError::VersionConflict`] when someone else
    /// wrote in between; the stored sequence is untouched in both cases.
    pub async fn replace_available_inputs_if_version(
        &self,
        key_hash: &str,
        product: &str,
        expected: u64,
        inputs: Vec<InputDocument>,
    ) -> LedgerResult<u64> {
        let (key_hash, product) = (key_hash.to_string(), product.to_string());
        self.run("replace_available_inputs_if_version", move |conn| {
            immediate(conn, |db| {
                let current: Option<i64> = db
                    .query_row(
                        "SELECT version FROM available_inputs WHERE key_hash = ?1 AND product = ?2",
                        params![key_hash, product],
                        |row| row.get(0),
                    )
                    .optional()?;

                match current {
                    None => Err(LedgerError::NotFound(subject(&key_hash, &product))),
                    Some(found) if found as u64 != expected => Err(LedgerError::VersionConflict {
                        key_hash: key_hash.clone(),
                        product: product.clone(),
                        expected,
                        found: found as u64,
                    }),
                    Some(_) => replace_items(db, &key_hash, &product, &inputs)?.ok_or_else(|| {
                        LedgerError::Internal("inputs row vanished inside write lock".to_string())
                    }),
                }
            })
        })
        .await
    }

    /// Removes the pair's row and items. Returns `false` if there was none.
    /// Failures are also reported on the failure channel.
    pub async fn delete_available_inputs(
        &self,
        key_hash: &str,
        product: &str,
    ) -> LedgerResult<bool> {
        let subject = subject(key_hash, product);
        let (key_hash, product) = (key_hash.to_string(), product.to_string());

        let result = self
            .run("delete_available_inputs", move |conn| {
                immediate(conn, |db| {
                    // Items go with the row through ON DELETE CASCADE.
                    let removed = db.execute(
                        "DELETE FROM available_inputs WHERE key_hash = ?1 AND product = ?2",
                        params![key_hash, product],
                    )?;
                    Ok(removed > 0)
                })
            })
            .await;

        match &result {
            Ok(removed) => tracing::debug!(%subject, removed, "available inputs deleted"),
            Err(_) => self.report_failure("delete_available_inputs", &subject, &result),
        }
        result
    }
}
