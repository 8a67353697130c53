//! Product, origin and destination catalogs.

use rusqlite::{params, OptionalExtension, Row};

use super::{immediate, LedgerStore};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{Page, Place, PlaceKind, Product};

const PRODUCT_COLUMNS: &str = "code, name, measure_unit, multiplier, description";

fn place_from_row(row: &Row<'_>) -> rusqlite::Result<Place> {
    Ok(Place {
        code: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        code: row.get(0)?,
        name: row.get(1)?,
        measure_unit: row.get(2)?,
        multiplier: row.get(3)?,
        description: row.get(4)?,
    })
}

impl LedgerStore {
    /// Inserts a product, or overwrites every field of an existing one with
    /// the same code.
    pub async fn upsert_product(&self, product: Product) -> LedgerResult<()> {
        if product.code.is_empty() {
            return Err(LedgerError::InvalidArgument("product code is empty".to_string()));
        }
        if product.multiplier <= 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "product {} has non-positive multiplier {}",
                product.code, product.multiplier
            )));
        }

        let code = product.code.clone();
        self.run("upsert_product", move |conn| {
            immediate(conn, |db| {
                db.execute(
                    "INSERT INTO products (code, name, measure_unit, multiplier, description)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(code) DO UPDATE SET
                        name = excluded.name,
                        measure_unit = excluded.measure_unit,
                        multiplier = excluded.multiplier,
                        description = excluded.description",
                    params![
                        product.code,
                        product.name,
                        product.measure_unit,
                        product.multiplier,
                        product.description,
                    ],
                )?;
                Ok(())
            })
        })
        .await?;

        tracing::debug!(product = %code, "product saved");
        Ok(())
    }

    pub async fn get_product(&self, code: &str) -> LedgerResult<Option<Product>> {
        let code = code.to_string();
        self.run("get_product", move |conn| {
            let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1");
            Ok(conn.query_row(&sql, params![code], product_from_row).optional()?)
        })
        .await
    }

    /// Products ordered by code.
    pub async fn list_products(&self, page: Page) -> LedgerResult<Vec<Product>> {
        let (limit, offset) = page.sql_bounds();
        self.run("list_products", move |conn| {
            let sql = format!(
                "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY code LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let products = stmt
                .query_map(params![limit, offset], product_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(products)
        })
        .await
    }

    /// Inserts or overwrites an origin or destination.
    pub async fn upsert_place(&self, kind: PlaceKind, place: Place) -> LedgerResult<()> {
        if place.code.is_empty() {
            return Err(LedgerError::InvalidArgument(format!("{kind} code is empty")));
        }

        let code = place.code.clone();
        self.run("upsert_place", move |conn| {
            // The table name comes from `PlaceKind`, never from the caller.
            let sql = format!(
                "INSERT INTO {} (code, name, description) VALUES (?1, ?2, ?3)
                 ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description",
                kind.table()
            );
            immediate(conn, |db| {
                db.execute(&sql, params![place.code, place.name, place.description])?;
                Ok(())
            })
        })
        .await?;

        tracing::debug!(%kind, code = %code, "place saved");
        Ok(())
    }

    pub async fn get_place(&self, kind: PlaceKind, code: &str) -> LedgerResult<Option<Place>> {
        let code = code.to_string();
        self.run("get_place", move |conn| {
            let sql = format!(
                "SELECT code, name, description FROM {} WHERE code = ?1",
                kind.table()
            );
            Ok(conn.query_row(&sql, params![code], place_from_row).optional()?)
        })
        .await
    }

    /// Origins or destinations ordered by code.
    pub async fn list_places(&self, kind: PlaceKind, page: Page) -> LedgerResult<Vec<Place>> {
        let (limit, offset) = page.sql_bounds();
        self.run("list_places", move |conn| {
            let sql = format!(
                "SELECT code, name, description FROM {} ORDER BY code LIMIT ?1 OFFSET ?2",
                kind.table()
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let places = stmt
                .query_map(params![limit, offset], place_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(places)
        })
        .await
    }
}
