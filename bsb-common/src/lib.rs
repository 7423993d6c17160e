//! BSB Bridge Common Library
//!
//! This crate provides shared types and utilities for the BSB boiler bridge:
//!
//! - [`telegram`] - Bus telegram model (`Telegram`, `CommandKind`, `TelegramRecord`)
//! - [`device`] - Device driver interface and listener registration
//! - [`topic`] - MQTT topic builders and parsers
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`error`] - Error types

pub mod config;
pub mod device;
pub mod error;
pub mod telegram;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig, load_config, parse_config};
pub use device::{
    BoilerDevice, DeviceError, EventListener, ListenerHandle, Listeners, ValueListener,
};
pub use error::{Error, Result};
pub use telegram::{CommandKind, Telegram, TelegramRecord};
pub use topic::{DEFAULT_DISCOVERY_PREFIX, DEFAULT_PREFIX, TopicBuilder};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
