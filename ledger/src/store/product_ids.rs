//! Custody of identified product units.
//!
//! Each unit has one row. The first movement creates it and pins
//! `first_transaction`; every later movement overwrites the last
//! transaction, owner and destination.

use rusqlite::{params, OptionalExtension, Row};

use super::{immediate, LedgerStore};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{Page, ProductId, ProductMovement};

const PRODUCT_ID_COLUMNS: &str =
    "id, product, first_transaction, last_transaction, owner, destination";

fn product_id_from_row(row: &Row<'_>) -> rusqlite::Result<ProductId> {
    Ok(ProductId {
        id: row.get(0)?,
        product: row.get(1)?,
        first_transaction: row.get(2)?,
        last_transaction: row.get(3)?,
        owner: row.get(4)?,
        destination: row.get(5)?,
    })
}

impl LedgerStore {
    /// Applies one movement and returns the updated custody record.
    ///
    /// A unit never changes product: a movement naming a different product
    /// for a known id fails with [`LedgerError::InvalidArgument`].
    pub async fn track_product_id(&self, movement: ProductMovement) -> LedgerResult<ProductId> {
        if movement.id.is_empty() || movement.transaction.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "product id and transaction must not be empty".to_string(),
            ));
        }

        let record = self
            .run("track_product_id", move |conn| {
                immediate(conn, |db| {
                    let sql = format!(
                        "INSERT INTO product_ids ({PRODUCT_ID_COLUMNS})
                         VALUES (?1, ?2, ?3, ?3, ?4, ?5)
                         ON CONFLICT(id) DO UPDATE SET
                            last_transaction = excluded.last_transaction,
                            owner = excluded.owner,
                            destination = excluded.destination
                         WHERE product_ids.product = excluded.product
                         RETURNING {PRODUCT_ID_COLUMNS}"
                    );
                    let record = db
                        .query_row(
                            &sql,
                            params![
                                movement.id,
                                movement.product,
                                movement.transaction,
                                movement.owner,
                                movement.destination,
                            ],
                            product_id_from_row,
                        )
                        .optional()?;

                    record.ok_or_else(|| {
                        LedgerError::InvalidArgument(format!(
                            "product id {} is tracked for another product than {}",
                            movement.id, movement.product
                        ))
                    })
                })
            })
            .await?;

        tracing::debug!(
            product_id = %record.id,
            tx_hash = %record.last_transaction,
            owner = ?record.owner,
            "product id moved"
        );
        Ok(record)
    }

    pub async fn get_product_id(&self, id: &str) -> LedgerResult<Option<ProductId>> {
        let id = id.to_string();
        self.run("get_product_id", move |conn| {
            let sql = format!("SELECT {PRODUCT_ID_COLUMNS} FROM product_ids WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], product_id_from_row).optional()?)
        })
        .await
    }

    /// Units currently held by `owner`, ordered by product then id.
    pub async fn product_ids_owned_by(
        &self,
        owner: &str,
        page: Page,
    ) -> LedgerResult<Vec<ProductId>> {
        let owner = owner.to_string();
        let (limit, offset) = page.sql_bounds();
        self.run("product_ids_owned_by", move |conn| {
            let sql = format!(
                "SELECT {PRODUCT_ID_COLUMNS} FROM product_ids WHERE owner = ?1
                 ORDER BY product, id LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let records = stmt
                .query_map(params![owner, limit, offset], product_id_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::store::test_support::*;
    use crate::types::{Page, ProductMovement};

    fn movement(id: &str, tx: &str, owner: Option<&str>) -> ProductMovement {
        ProductMovement {
            id: id.to_string(),
            product: "milk".to_string(),
            transaction: tx.to_string(),
            owner: owner.map(str::to_string),
            destination: None,
        }
    }

    #[tokio::test]
    async fn first_transaction_is_pinned() {
        let store = store().await;
        let minted = store
            .track_product_id(movement("lot-7", "t0", Some("h1")))
            .await
            .unwrap();
        assert_eq!(minted.first_transaction, "t0");
        assert_eq!(minted.last_transaction, "t0");

        let mut shipped = movement("lot-7", "t1", Some("h2"));
        shipped.destination = Some("port-1".to_string());
        let moved = store.track_product_id(shipped).await.unwrap();
        assert_eq!(moved.first_transaction, "t0");
        assert_eq!(moved.last_transaction, "t1");
        assert_eq!(moved.owner.as_deref(), Some("h2"));
        assert_eq!(moved.destination.as_deref(), Some("port-1"));

        assert_eq!(store.get_product_id("lot-7").await.unwrap(), Some(moved));
        assert!(store.get_product_id("lot-8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unit_cannot_change_product() {
        let store = store().await;
        store
            .track_product_id(movement("lot-7", "t0", Some("h1")))
            .await
            .unwrap();

        let mut other = movement("lot-7", "t1", Some("h2"));
        other.product = "cheese".to_string();
        let err = store.track_product_id(other).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let stored = store.get_product_id("lot-7").await.unwrap().unwrap();
        assert_eq!(stored.product, "milk");
        assert_eq!(stored.last_transaction, "t0");
    }

    #[tokio::test]
    async fn lists_units_by_current_owner() {
        let store = store().await;
        for (id, owner) in [("b", "h1"), ("a", "h1"), ("c", "h2")] {
            store
                .track_product_id(movement(id, "t0", Some(owner)))
                .await
                .unwrap();
        }
        store
            .track_product_id(movement("b", "t1", Some("h2")))
            .await
            .unwrap();

        let held: Vec<_> = store
            .product_ids_owned_by("h1", Page::default())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(held, ["a"]);

        let held = store
            .product_ids_owned_by("h2", Page::default())
            .await
            .unwrap();
        assert_eq!(held.len(), 2);
    }
}
