// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TraceLedger CLI
//!
//! Entry point for the `traceledger` binary. Parses CLI arguments,
//! initializes logging, opens the store and runs one command against it.
//!
//! - `init`    create the database and schema
//! - `key`     register, approve, revoke and inspect keys
//! - `tx`      record and inspect transactions
//! - `ingest`  bulk-record transactions from a JSON-lines file
//! - `inputs`  read and write available inputs
//! - `product` manage the product catalog
//! - `origin`, `destination` manage the place catalogs
//! - `product-id` track custody of product units
//! - `version` print version information

mod cli;
mod ingest;
mod logging;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};

use traceledger::config::SCHEMA_VERSION;
use traceledger::{InputDocument, LedgerStore, NewKey, NewTransaction, Place, PlaceKind};
use traceledger::{Product, ProductMovement, RecordOutcome};

use cli::{Commands, InputsCommand, KeyCommand, PlaceCommand, ProductCommand};
use cli::{ProductIdCommand, TraceLedgerCli, TxCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TraceLedgerCli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    logging::init_logging(cli.log_format);

    let config = cli.store.to_config();
    let location = config.location.clone();
    let store = LedgerStore::open(config)
        .await
        .with_context(|| format!("failed to open ledger at {location}"))?;
    tracing::debug!(%location, "ledger opened");

    let result = execute(&store, cli.command).await;

    if cli.print_metrics {
        eprint!("{}", store.metrics().encode()?);
    }

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Runs one command and returns what to print.
async fn execute(store: &LedgerStore, command: Commands) -> Result<Value> {
    match command {
        Commands::Init => Ok(json!({
            "initialized": true,
            "schema_version": SCHEMA_VERSION,
        })),
        Commands::Key(cmd) => key_command(store, cmd).await,
        Commands::Tx(cmd) => tx_command(store, cmd).await,
        Commands::Ingest(args) => {
            let summary =
                ingest::ingest_file(store, &args.path, usize::from(args.concurrency)).await?;
            Ok(serde_json::to_value(summary)?)
        }
        Commands::Inputs(cmd) => inputs_command(store, cmd).await,
        Commands::Product(cmd) => product_command(store, cmd).await,
        Commands::Origin(cmd) => place_command(store, PlaceKind::Origin, cmd).await,
        Commands::Destination(cmd) => place_command(store, PlaceKind::Destination, cmd).await,
        Commands::ProductId(cmd) => product_id_command(store, cmd).await,
        Commands::Version => Ok(json!({ "version": env!("CARGO_PKG_VERSION") })),
    }
}

async fn key_command(store: &LedgerStore, cmd: KeyCommand) -> Result<Value> {
    match cmd {
        KeyCommand::Register {
            name,
            public_key,
            hash,
            description,
            activate,
        } => {
            let mut key = match hash {
                Some(hash) => NewKey::new(name, hash, public_key),
                None => NewKey::from_public_key(name, public_key),
            };
            key.description = description;
            let hash = key.hash.clone();

            store.register_key(key).await?;
            if activate {
                store.activate_key(&hash).await?;
            }
            let key = store
                .get_key(&hash)
                .await?
                .ok_or_else(|| anyhow!("key {hash} vanished after registration"))?;
            Ok(serde_json::to_value(key)?)
        }
        KeyCommand::Activate { hash } => {
            store.activate_key(&hash).await?;
            Ok(json!({ "hash": hash, "status": "active" }))
        }
        KeyCommand::Deactivate { hash } => {
            store.deactivate_key(&hash).await?;
            Ok(json!({ "hash": hash, "status": "inactive" }))
        }
        KeyCommand::Remove { hash } => {
            store.remove_key(&hash).await?;
            Ok(json!({ "hash": hash, "removed": true }))
        }
        KeyCommand::Show { hash } => match store.get_key(&hash).await? {
            Some(key) => Ok(serde_json::to_value(key)?),
            None => bail!("key {hash} not found"),
        },
        KeyCommand::Find { query } => match store.find_key(&query).await? {
            Some(key) => Ok(serde_json::to_value(key)?),
            None => bail!("no key with hash or name {query}"),
        },
        KeyCommand::List { status, page } => {
            let keys = store.list_keys(status, page.page()).await?;
            Ok(serde_json::to_value(keys)?)
        }
        KeyCommand::Pk { hash } => {
            let public_key = store.get_public_key(&hash).await?;
            Ok(json!({ "hash": hash, "public_key": public_key }))
        }
    }
}

async fn tx_command(store: &LedgerStore, cmd: TxCommand) -> Result<Value> {
    match cmd {
        TxCommand::Record { json } => {
            let tx: NewTransaction =
                serde_json::from_str(&json).context("transaction is not valid JSON")?;
            let hash = tx.hash.clone();
            let outcome = store.record_transaction(tx).await?;
            Ok(json!({
                "hash": hash,
                "outcome": outcome,
                "recorded": outcome == RecordOutcome::Recorded,
            }))
        }
        TxCommand::Show { hash } => match store.get_transaction(&hash).await? {
            Some(tx) => Ok(serde_json::to_value(tx)?),
            None => bail!("transaction {hash} not found"),
        },
        TxCommand::List { page } => {
            let txs = store.list_transactions(page.page()).await?;
            Ok(serde_json::to_value(txs)?)
        }
        TxCommand::Link {
            t_hash,
            input,
            product,
        } => {
            let created = store.link_transaction_input(&t_hash, &input, &product).await?;
            Ok(json!({
                "t_hash": t_hash,
                "input": input,
                "product": product,
                "created": created,
            }))
        }
    }
}

fn parse_inputs(raw: &str) -> Result<Vec<InputDocument>> {
    serde_json::from_str(raw).context("inputs must be a JSON array")
}

async fn inputs_command(store: &LedgerStore, cmd: InputsCommand) -> Result<Value> {
    match cmd {
        InputsCommand::Get { key_hash, product } => {
            let stored = store.get_available_inputs_versioned(&key_hash, &product).await?;
            Ok(serde_json::to_value(stored)?)
        }
        InputsCommand::Put {
            key_hash,
            product,
            inputs,
        } => {
            let inputs = parse_inputs(&inputs)?;
            store.put_available_inputs(&key_hash, &product, inputs).await?;
            Ok(json!({ "key_hash": key_hash, "product": product, "version": 1 }))
        }
        InputsCommand::Update {
            key_hash,
            product,
            inputs,
            if_version,
        } => {
            let inputs = parse_inputs(&inputs)?;
            match if_version {
                Some(expected) => {
                    let version = store
                        .replace_available_inputs_if_version(&key_hash, &product, expected, inputs)
                        .await?;
                    Ok(json!({ "key_hash": key_hash, "product": product, "version": version }))
                }
                None => {
                    let updated = store
                        .update_available_inputs(&key_hash, &product, inputs)
                        .await?;
                    Ok(json!({ "key_hash": key_hash, "product": product, "updated": updated }))
                }
            }
        }
        InputsCommand::Delete { key_hash, product } => {
            let deleted = store.delete_available_inputs(&key_hash, &product).await?;
            Ok(json!({ "key_hash": key_hash, "product": product, "deleted": deleted }))
        }
    }
}

async fn product_command(store: &LedgerStore, cmd: ProductCommand) -> Result<Value> {
    match cmd {
        ProductCommand::Set {
            code,
            name,
            measure_unit,
            multiplier,
            description,
        } => {
            let product = Product {
                multiplier,
                description,
                ..Product::new(code, name, measure_unit)
            };
            store.upsert_product(product.clone()).await?;
            Ok(serde_json::to_value(product)?)
        }
        ProductCommand::Show { code } => match store.get_product(&code).await? {
            Some(product) => Ok(serde_json::to_value(product)?),
            None => bail!("product {code} not found"),
        },
        ProductCommand::List { page } => {
            let products = store.list_products(page.page()).await?;
            Ok(serde_json::to_value(products)?)
        }
    }
}

async fn place_command(store: &LedgerStore, kind: PlaceKind, cmd: PlaceCommand) -> Result<Value> {
    match cmd {
        PlaceCommand::Set {
            code,
            name,
            description,
        } => {
            let place = Place {
                description,
                ..Place::new(code, name)
            };
            store.upsert_place(kind, place.clone()).await?;
            Ok(serde_json::to_value(place)?)
        }
        PlaceCommand::Show { code } => match store.get_place(kind, &code).await? {
            Some(place) => Ok(serde_json::to_value(place)?),
            None => bail!("{kind} {code} not found"),
        },
        PlaceCommand::List { page } => {
            let places = store.list_places(kind, page.page()).await?;
            Ok(serde_json::to_value(places)?)
        }
    }
}

async fn product_id_command(store: &LedgerStore, cmd: ProductIdCommand) -> Result<Value> {
    match cmd {
        ProductIdCommand::Track {
            id,
            product,
            transaction,
            owner,
            destination,
        } => {
            let movement = ProductMovement {
                id,
                product,
                transaction,
                owner,
                destination,
            };
            let record = store.track_product_id(movement).await?;
            Ok(serde_json::to_value(record)?)
        }
        ProductIdCommand::Show { id } => match store.get_product_id(&id).await? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => bail!("product id {id} not found"),
        },
        ProductIdCommand::Owned { owner, page } => {
            let records = store.product_ids_owned_by(&owner, page.page()).await?;
            Ok(serde_json::to_value(records)?)
        }
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("traceledger {}", env!("CARGO_PKG_VERSION"));
    println!("schema      {}", SCHEMA_VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(store: &LedgerStore, args: &[&str]) -> Result<Value> {
        let argv = std::iter::once("traceledger").chain(args.iter().copied());
        let cli = TraceLedgerCli::try_parse_from(argv)?;
        execute(store, cli.command).await
    }

    #[tokio::test]
    async fn key_lifecycle_through_commands() {
        let store = LedgerStore::open_in_memory().await.unwrap();

        let key = run(&store, &["key", "register", "alice", "pub1", "--hash", "h1"])
            .await
            .unwrap();
        assert_eq!(key["status"], "new");

        assert!(run(&store, &["key", "pk", "h1"]).await.is_err());
        run(&store, &["key", "activate", "h1"]).await.unwrap();
        let pk = run(&store, &["key", "pk", "h1"]).await.unwrap();
        assert_eq!(pk["public_key"], "pub1");

        let listed = run(&store, &["key", "list"]).await.unwrap();
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn inputs_commands_respect_versions() {
        let store = LedgerStore::open_in_memory().await.unwrap();

        let got = run(&store, &["inputs", "get", "h1", "milk"]).await.unwrap();
        assert!(got.is_null());

        run(&store, &["inputs", "put", "h1", "milk", r#"[{"tx":"t0"}]"#])
            .await
            .unwrap();
        let stale = run(
            &store,
            &["inputs", "update", "h1", "milk", "[]", "--if-version", "7"],
        )
        .await
        .unwrap_err();
        assert!(stale.to_string().contains("version conflict"));

        let updated = run(
            &store,
            &["inputs", "update", "h1", "milk", "[]", "--if-version", "1"],
        )
        .await
        .unwrap();
        assert_eq!(updated["version"], 2);

        let got = run(&store, &["inputs", "get", "h1", "milk"]).await.unwrap();
        assert_eq!(got["inputs"], json!([]));

        assert!(run(&store, &["inputs", "put", "h1", "milk", "{}"]).await.is_err());
    }

    #[tokio::test]
    async fn record_reports_duplicates() {
        let store = LedgerStore::open_in_memory().await.unwrap();
        let tx = json!({
            "hash": "t1", "type": 1, "mode": 0, "transmitter": "h1",
            "timestamp": 1_700_000_000_000_i64, "data": {}, "sign": "00",
        })
        .to_string();

        let first = run(&store, &["tx", "record", &tx]).await.unwrap();
        assert_eq!(first["outcome"], "recorded");
        let second = run(&store, &["tx", "record", &tx]).await.unwrap();
        assert_eq!(second["outcome"], "already_recorded");
        assert_eq!(second["recorded"], false);
    }

    #[tokio::test]
    async fn places_and_product_ids_through_commands() {
        let store = LedgerStore::open_in_memory().await.unwrap();

        run(&store, &["origin", "set", "AR-BA", "Buenos Aires"])
            .await
            .unwrap();
        assert!(run(&store, &["destination", "show", "AR-BA"]).await.is_err());
        let origin = run(&store, &["origin", "show", "AR-BA"]).await.unwrap();
        assert_eq!(origin["name"], "Buenos Aires");

        run(&store, &["product-id", "track", "lot-7", "milk", "t0", "--owner", "h1"])
            .await
            .unwrap();
        let moved = run(&store, &["product-id", "track", "lot-7", "milk", "t1", "--owner", "h2"])
            .await
            .unwrap();
        assert_eq!(moved["first_transaction"], "t0");
        assert_eq!(moved["last_transaction"], "t1");

        let owned = run(&store, &["product-id", "owned", "h2"]).await.unwrap();
        assert_eq!(owned.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn key_find_falls_back_to_name() {
        let store = LedgerStore::open_in_memory().await.unwrap();
        run(&store, &["key", "register", "alice", "pub1", "--hash", "h1"])
            .await
            .unwrap();

        let key = run(&store, &["key", "find", "alice"]).await.unwrap();
        assert_eq!(key["hash"], "h1");
        assert!(run(&store, &["key", "find", "bob"]).await.is_err());
    }
}
