//! # CLI Interface
//!
//! Command-line structure for `traceledger`, using `clap` derive. Store
//! settings are global flags backed by `TRACELEDGER_*` environment
//! variables; everything else is a subcommand per entity.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use traceledger::config::{DEFAULT_PAGE_SIZE, DEFAULT_POOL_SIZE, MAX_PAGE_SIZE};
use traceledger::{DatabaseLocation, KeyStatus, Page, StoreConfig};

use crate::logging::LogFormat;

/// TraceLedger store administration.
///
/// Registers keys, records transactions, and inspects or edits available
/// inputs and products in a TraceLedger SQLite database. Results are
/// printed to stdout as JSON; logs go to stderr.
#[derive(Parser, Debug)]
#[command(
    name = "traceledger",
    about = "TraceLedger store administration",
    version,
    propagate_version = true
)]
pub struct TraceLedgerCli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log output format.
    #[arg(
        long,
        env = "TRACELEDGER_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,

    /// Print the store's Prometheus metrics to stderr before exiting.
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the database lives and how the pool behaves.
#[derive(Args, Debug)]
pub struct StoreArgs {
    /// SQLite database file, or `:memory:` for a throwaway database.
    #[arg(long, env = "TRACELEDGER_DB", default_value = "traceledger.db", global = true)]
    pub db: String,

    /// Number of pooled connections.
    #[arg(long, env = "TRACELEDGER_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE, global = true)]
    pub pool_size: usize,

    /// Per-operation statement timeout in milliseconds.
    #[arg(long, env = "TRACELEDGER_STATEMENT_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    pub statement_timeout_ms: u64,

    /// How long to wait for a free connection, in milliseconds.
    #[arg(long, env = "TRACELEDGER_ACQUIRE_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub acquire_timeout_ms: u64,
}

impl StoreArgs {
    pub fn to_config(&self) -> StoreConfig {
        StoreConfig {
            location: DatabaseLocation::parse(&self.db),
            ..StoreConfig::default()
        }
        .with_pool_size(self.pool_size)
        .with_statement_timeout(Duration::from_millis(self.statement_timeout_ms))
        .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
    }
}

/// 1-based paging for listings.
#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// Page number, starting at 1.
    #[arg(long, default_value_t = 1)]
    pub page: u64,

    /// Rows per page.
    #[arg(
        long,
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PAGE_SIZE))
    )]
    pub size: u32,
}

impl PageArgs {
    pub fn page(&self) -> Page {
        Page::numbered(self.page, self.size)
    }
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and its schema if missing.
    Init,
    /// Manage registered keys.
    #[command(subcommand)]
    Key(KeyCommand),
    /// Record and inspect transactions.
    #[command(subcommand)]
    Tx(TxCommand),
    /// Record every transaction of a JSON-lines file.
    Ingest(IngestArgs),
    /// Read or write available inputs of a key for a product.
    #[command(subcommand)]
    Inputs(InputsCommand),
    /// Manage the product catalog.
    #[command(subcommand)]
    Product(ProductCommand),
    /// Manage the origin catalog.
    #[command(subcommand)]
    Origin(PlaceCommand),
    /// Manage the destination catalog.
    #[command(subcommand)]
    Destination(PlaceCommand),
    /// Track custody of identified product units.
    #[command(subcommand)]
    ProductId(ProductIdCommand),
    /// Print version information and exit.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Register a key. It stays pending until activated.
    Register {
        /// Display name of the key owner.
        name: String,
        /// Public key text.
        public_key: String,
        /// Key hash. Defaults to the SHA-256 hex digest of the public key.
        #[arg(long)]
        hash: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Activate the key right after registering it.
        #[arg(long)]
        activate: bool,
    },
    /// Approve a pending key.
    Activate { hash: String },
    /// Revoke a key.
    Deactivate { hash: String },
    /// Delete a key that is still pending.
    Remove { hash: String },
    /// Show a key whatever its status.
    Show { hash: String },
    /// Find a key by hash, or by name if no hash matches.
    Find { query: String },
    /// List keys with a given status.
    List {
        /// new, active or inactive.
        #[arg(long, default_value = "active")]
        status: KeyStatus,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Print the public key of an active key.
    Pk { hash: String },
}

#[derive(Subcommand, Debug)]
pub enum TxCommand {
    /// Record one transaction given as a JSON object.
    Record {
        /// e.g. '{"hash":"t1","type":1,"mode":0,"transmitter":"h1",...}'
        json: String,
    },
    /// Show a recorded transaction.
    Show { hash: String },
    /// List transactions, newest first.
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Record that a transaction consumed another one for a product.
    Link {
        t_hash: String,
        input: String,
        product: String,
    },
}

/// Arguments for the `ingest` subcommand.
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// File with one transaction JSON object per line.
    pub path: PathBuf,

    /// How many transactions to record at once.
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub concurrency: u16,
}

#[derive(Subcommand, Debug)]
pub enum InputsCommand {
    /// Print the stored sequence and its version.
    Get { key_hash: String, product: String },
    /// Create the sequence for a pair that has none yet.
    Put {
        key_hash: String,
        product: String,
        /// JSON array of input documents.
        inputs: String,
    },
    /// Replace the sequence of an existing pair.
    Update {
        key_hash: String,
        product: String,
        /// JSON array of input documents.
        inputs: String,
        /// Only replace if the stored version still matches.
        #[arg(long)]
        if_version: Option<u64>,
    },
    /// Delete the sequence of a pair.
    Delete { key_hash: String, product: String },
}

#[derive(Subcommand, Debug)]
pub enum ProductCommand {
    /// Create or overwrite a product.
    Set {
        code: String,
        name: String,
        measure_unit: String,
        #[arg(long, default_value_t = 1)]
        multiplier: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show one product.
    Show { code: String },
    /// List products by code.
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

/// Shared by `origin` and `destination`.
#[derive(Subcommand, Debug)]
pub enum PlaceCommand {
    /// Create or overwrite an entry.
    Set {
        code: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show one entry.
    Show { code: String },
    /// List entries by code.
    List {
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProductIdCommand {
    /// Record that a unit moved in a transaction.
    Track {
        id: String,
        product: String,
        transaction: String,
        /// Key now holding the unit.
        #[arg(long)]
        owner: Option<String>,
        /// Destination code, once the unit leaves the chain.
        #[arg(long)]
        destination: Option<String>,
    },
    /// Show the custody record of a unit.
    Show { id: String },
    /// List units held by a key.
    Owned {
        owner: String,
        #[command(flatten)]
        page: PageArgs,
    },
}
