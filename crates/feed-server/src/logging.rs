//! Subscriber installation

use anyhow::anyhow;
use feed_core::LogConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` overrides `log.filter`
pub(crate) fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| anyhow!(err))
}
