//! Structured logging setup.
//!
//! Grounded on the teacher's `logger.rs`, replaced with `tracing`/`tracing-subscriber`
//! since this pipeline's ambient stack favors structured, span-aware logging over a
//! hand-rolled `log::Log` sink — every other piece of this crate (retries, run
//! lifecycle, delivery) benefits from span-scoped fields rather than flat lines.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Output format for the process log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, with ANSI color when attached to a terminal.
    Pretty,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

/// Initialize the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter (`info` for this crate, `warn` elsewhere).
/// Safe to call once per process; a second call is a logic error in the caller, not
/// something this function attempts to paper over.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,crypto_sentinel=info"));

    match format {
        LogFormat::Pretty => {
            fmt().with_env_filter(filter).with_target(true).try_init()
        }
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
