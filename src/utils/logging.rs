//! Structured logging setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left to the
//! embedding process. [`init_logging`] is the convenience path driven by
//! [`LoggingConfig`].

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set. Fails with
/// `ConfigError` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
