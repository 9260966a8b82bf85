//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Builds the filter directive for `level`, or `debug` when `verbose`.
///
/// `RUST_LOG` wins over both when set.
pub fn filter_for(level: &str, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = if verbose { "debug" } else { level };
    EnvFilter::try_new(level.to_lowercase())
        .map_err(|e| anyhow::anyhow!("Invalid log level {:?}: {}", level, e))
}

/// Installs the global `fmt` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, verbose: bool) -> Result<()> {
    let filter = filter_for(level, verbose)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
