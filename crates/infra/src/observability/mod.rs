//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when set. Install once per
//! process; later calls return an error and leave the first subscriber in
//! place.

use steadycall_core::{LogFormat, LoggingConfig, Result, SteadycallError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber described by `config`
///
/// # Errors
/// Returns `SteadycallError::Config` for an unparsable level directive and
/// `SteadycallError::Internal` when a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            SteadycallError::Config(format!("Invalid log level `{}`: {e}", config.level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    installed.map_err(|e| SteadycallError::Internal(format!("Tracing already initialised: {e}")))
}
