//! Logging setup

use crate::config::LogConfig;
use crate::error::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log target for chain index events.
pub const LOG_TARGET_CHAIN: &str = "chain";
/// Log target for cell set events.
pub const LOG_TARGET_CELL_SET: &str = "cell_set";
/// Log target for transaction pool events.
pub const LOG_TARGET_TX_POOL: &str = "tx_pool";
/// Log target for script execution.
pub const LOG_TARGET_SCRIPT: &str = "script";

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Fails if a global
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|err| Error::Config(format!("invalid log filter: {}", err)))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(config.color);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| Error::Config(format!("logger already initialized: {}", err)))
}
