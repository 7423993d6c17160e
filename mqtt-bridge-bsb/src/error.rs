//! Error types for the BSB bridge.

use bsb_common::DeviceError;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Unrecoverable broker connection failure.
    #[error("MQTT connection error: {0}")]
    MqttConnection(String),

    /// Request rejected by the MQTT client.
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// Device driver error.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP server error.
    #[error("HTTP server error: {0}")]
    Http(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<CatalogError> for BridgeError {
    fn from(err: CatalogError) -> Self {
        Self::ConfigValidation(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bsb_common::Error> for BridgeError {
    fn from(err: bsb_common::Error) -> Self {
        match err {
            bsb_common::Error::Config(msg) => Self::ConfigParse(msg),
        }
    }
}
