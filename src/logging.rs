//! Logging setup.
//!
//! The library only emits `tracing` events. Applications that want them
//! printed call [`init_logging`] once at startup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{CluevaultError, Result};

/// Install a global subscriber. `RUST_LOG` overrides the configured level.
///
/// Calling this twice returns an error instead of panicking.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = fmt::layer().with_target(config.with_target);

    let init = if config.json_format {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    init.map_err(|e| CluevaultError::Config(format!("logging init failed: {}", e)))
}
