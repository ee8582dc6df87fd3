//! Tracing setup for binaries and embedding applications.
//!
//! The library itself only emits `tracing` events. Installing a subscriber is
//! left to the application; these helpers install the usual one. `RUST_LOG`
//! takes precedence over the level passed in.

use tracing_subscriber::EnvFilter;

use crate::config::CollectionConfig;

/// Installs a global fmt subscriber.
///
/// `level` is used when `RUST_LOG` is not set. With `json` set, events are
/// written as JSON lines. Returns an error if a global subscriber is already
/// installed.
pub fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

/// Installs a subscriber using the collection's configured log level.
pub fn init_from_config(config: &CollectionConfig, json: bool) -> anyhow::Result<()> {
    init_tracing(&config.collection.log_level, json)
}

