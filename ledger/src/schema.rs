//! # Schema
//!
//! Table layout of the ledger database. Bootstrap is idempotent: every
//! statement is `CREATE ... IF NOT EXISTS`, and the schema version row is
//! inserted only once.
//!
//! | Table                   | Key                              | Notes                                |
//! |-------------------------|----------------------------------|--------------------------------------|
//! | `keys`                  | `hash`                           | status `new` / `active` / `inactive` |
//! | `transactions`          | `hash`                           | `transaction_data` is JSON text      |
//! | `available_inputs`      | `(key_hash, product)`            | one row per pair, carries `version`  |
//! | `available_input_items` | `(key_hash, product, position)`  | one JSON document per element        |
//! | `transaction_inputs`    | `UNIQUE(t_hash, input, product)` | links a transaction to its inputs    |
//! | `products`              | `code`                           | product catalog                      |
//! | `product_ids`           | `id`                             | custody of one product unit          |
//! | `origins`               | `code`                           | origin catalog                       |
//! | `destinations`          | `code`                           | destination catalog                  |
//!
//! Input documents are stored one per row rather than as a single array
//! blob, so each element stays individually addressable by SQL (for
//! example through `json_extract(document, '$.field')`).

use rusqlite::{params, Connection};

use crate::config::SCHEMA_VERSION;
use crate::error::{LedgerError, LedgerResult};

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    id             INTEGER PRIMARY KEY CHECK (id = 0),
    schema_version INTEGER NOT NULL,
    updated_at     TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS keys (
    hash          TEXT PRIMARY KEY NOT NULL,
    name          TEXT NOT NULL,
    public_key    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'new'
                  CHECK (status IN ('new', 'active', 'inactive')),
    description   TEXT,
    registered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS keys_status_idx ON keys (status, name);

CREATE TABLE IF NOT EXISTS transactions (
    hash                 TEXT PRIMARY KEY NOT NULL,
    type                 INTEGER NOT NULL,
    mode                 INTEGER NOT NULL,
    transmitter          TEXT NOT NULL,
    receiver             TEXT,
    client_timestamp     TEXT NOT NULL,
    raw_client_timestamp INTEGER NOT NULL,
    server_timestamp     TEXT NOT NULL,
    transaction_data     TEXT NOT NULL CHECK (json_valid(transaction_data)),
    sign                 TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_client_ts_idx
    ON transactions (raw_client_timestamp DESC);

CREATE TABLE IF NOT EXISTS available_inputs (
    key_hash   TEXT NOT NULL,
    product    TEXT NOT NULL,
    version    INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (key_hash, product)
);

CREATE TABLE IF NOT EXISTS available_input_items (
    key_hash TEXT NOT NULL,
    product  TEXT NOT NULL,
    position INTEGER NOT NULL,
    document TEXT NOT NULL CHECK (json_valid(document)),
    PRIMARY KEY (key_hash, product, position),
    FOREIGN KEY (key_hash, product)
        REFERENCES available_inputs (key_hash, product) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transaction_inputs (
    t_hash  TEXT NOT NULL,
    input   TEXT NOT NULL,
    product TEXT NOT NULL,
    UNIQUE (t_hash, input, product)
);

CREATE INDEX IF NOT EXISTS transaction_inputs_input_idx
    ON transaction_inputs (input, product);

CREATE TABLE IF NOT EXISTS products (
    code         TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    measure_unit TEXT NOT NULL,
    multiplier   INTEGER NOT NULL DEFAULT 1,
    description  TEXT
);

CREATE TABLE IF NOT EXISTS product_ids (
    id                TEXT PRIMARY KEY NOT NULL,
    product           TEXT NOT NULL,
    first_transaction TEXT NOT NULL,
    last_transaction  TEXT NOT NULL,
    owner             TEXT,
    destination       TEXT
);

CREATE INDEX IF NOT EXISTS product_ids_owner_idx ON product_ids (owner, product, id);

CREATE TABLE IF NOT EXISTS origins (
    code        TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS destinations (
    code        TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    description TEXT
);
";

/// Creates every table and index if missing and records the schema version.
///
/// Refuses to run against a database written by a newer schema.
pub fn init_schema(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(CREATE_TABLES)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (id, schema_version) VALUES (0, ?1)",
        params![SCHEMA_VERSION],
    )?;

    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(LedgerError::InvalidArgument(format!(
            "database schema version {found} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    tracing::debug!(schema_version = found, "schema ready");
    Ok(())
}

/// Reads the recorded schema version.
pub fn schema_version(conn: &Connection) -> LedgerResult<u32> {
    let version: u32 = conn.query_row(
        "SELECT schema_version FROM schema_meta WHERE id = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "available_input_items",
            "available_inputs",
            "destinations",
            "keys",
            "origins",
            "product_ids",
            "products",
            "schema_meta",
            "transaction_inputs",
            "transactions",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "UPDATE schema_meta SET schema_version = ?1 WHERE id = 0",
            params![SCHEMA_VERSION + 1],
        )
        .unwrap();

        let err = init_schema(&conn).unwrap_err();
        assert_eq!(err.reason(), "invalid_argument");
    }

    #[test]
    fn key_status_is_checked() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let err = conn
            .execute(
                "INSERT INTO keys (hash, name, public_key, status, registered_at)
                 VALUES ('h', 'n', 'pk', 'bogus', '2026-01-01')",
                [],
            )
            .unwrap_err();
        assert!(!crate::error::is_unique_violation(&err));
    }
}
