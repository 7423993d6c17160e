//! MQTT bridge for BSB boiler controllers.
//!
//! Mirrors boiler values to retained MQTT state topics with Home Assistant
//! discovery, forwards authorized `set` commands to the boiler, and keeps a
//! filtered in-memory history of bus telegrams served over HTTP.
//!
//! # Topics
//!
//! ```text
//! home/boiler/<name>/state                        retained state
//! home/boiler/<name>/set                          commands
//! home/boiler/status                              online / offline
//! homeassistant/<component>/boiler/<name>/config  discovery
//! ```

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod eventlog;
pub mod filter;
pub mod http;
pub mod mqtt;
pub mod recorder;
pub mod relay;
pub mod simulator;
pub mod transform;

pub use bridge::{ObservedValue, Outgoing, SyncBridge};
pub use config::BsbBridgeConfig;
pub use error::{BridgeError, Result};
pub use eventlog::{EventLogStore, FilterBuffer, LogQuery};
pub use http::QueryServer;
pub use mqtt::MqttSession;
pub use simulator::SimulatedBoiler;
