//! Log setup for the `traceledger` binary.
//!
//! Command results own stdout, so every event goes to stderr. The filter is
//! [`DEFAULT_FILTER`] unless `RUST_LOG` is set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Quiet by default: store failures are logged at `error`, so they still
/// show up next to the command output.
pub const DEFAULT_FILTER: &str = "traceledger=warn";

/// `--log-format` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    Pretty,
    /// One JSON object per event, fields flattened.
    Json,
}

/// Installs the global subscriber. Panics if called twice.
pub fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}
