//! Configuration for the BSB bridge.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use bsb_common::topic::DEFAULT_GROUP_ID;
use bsb_common::{
    CommandKind, DEFAULT_DISCOVERY_PREFIX, DEFAULT_PREFIX, LoggingConfig, MqttConfig,
    TopicBuilder,
};
use serde::{Deserialize, Serialize};

use crate::catalog::{Item, ItemConfig, Metadata, TemplateLibrary, default_device_info, default_items};
use crate::error::{BridgeError, Result};
use crate::filter::{
    FilterSpec, TelegramFilter, default_benign_payloads, default_filters, default_info_denylist,
};
use crate::transform::{Correction, NameMap, RequestDecoder};

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BsbBridgeConfig {
    /// Broker connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Mirror and command settings
    #[serde(default)]
    pub bridge: SyncConfig,

    /// Event log buffers
    #[serde(default)]
    pub eventlog: EventLogConfig,

    /// Diagnostic HTTP server
    #[serde(default)]
    pub http: HttpConfig,

    /// Boiler driver settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// State mirror, discovery and command configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Topic namespace (default: "home/boiler")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Home Assistant discovery prefix (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Discovery node id (default: "boiler")
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Device block embedded in every discovery payload
    #[serde(default = "default_device_info")]
    pub device_info: Metadata,

    /// Extra template fragments, added to or replacing the built-in ones
    #[serde(default)]
    pub templates: HashMap<String, Metadata>,

    /// Mirrored items (default: the built-in boiler catalog)
    #[serde(default = "default_items")]
    pub items: Vec<ItemConfig>,

    /// Device name → broker name
    #[serde(default = "default_translations")]
    pub translations: HashMap<String, String>,

    /// Corrections keyed by broker name
    #[serde(default = "default_corrections")]
    pub corrections: HashMap<String, Correction>,

    /// Writable values and their payload decoders, keyed by device name
    #[serde(default = "default_requests")]
    pub requests: HashMap<String, RequestDecoder>,

    /// Telegram name → value re-read after a delay
    #[serde(default = "default_reactions")]
    pub reactions: HashMap<String, String>,

    /// Delay before a reaction re-read in milliseconds
    #[serde(default = "default_reaction_delay_ms")]
    pub reaction_delay_ms: u64,

    /// Telegram commands left out of the diagnostic log
    #[serde(default = "default_ignored_commands")]
    pub ignored_commands: Vec<CommandKind>,

    /// Values monitored by the driver without being mirrored
    #[serde(default = "default_extra_monitored")]
    pub extra_monitored: HashMap<String, Option<u64>>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_group_id() -> String {
    DEFAULT_GROUP_ID.to_string()
}

fn string_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_translations() -> HashMap<String, String> {
    string_map(&[
        ("room1_temp_status", "room1_temp"),
        ("outer_temp", "outside_temperature"),
        ("hc_boiler_status", "boiler_heating_status"),
    ])
}

fn default_corrections() -> HashMap<String, Correction> {
    let mut corrections = HashMap::new();
    corrections.insert("pump_modulation_pct".to_string(), Correction::OrZero);
    corrections.insert("burner_modulation_pct".to_string(), Correction::OrZero);
    corrections.insert("hc2_enabled".to_string(), Correction::OnOff);
    corrections
}

fn default_requests() -> HashMap<String, RequestDecoder> {
    let mut requests = HashMap::new();
    requests.insert("room1_temp_req".to_string(), RequestDecoder::Float);
    requests.insert("hc1_rampup_max_temp".to_string(), RequestDecoder::Float);
    requests.insert("hc1_operating_mode".to_string(), RequestDecoder::Text);
    requests.insert("hc2_operating_mode".to_string(), RequestDecoder::Text);
    requests.insert(
        "hc2_enabled".to_string(),
        RequestDecoder::Equals("ON".to_string()),
    );
    requests.insert(
        "hot_water_push".to_string(),
        RequestDecoder::Equals("PRESS".to_string()),
    );
    requests
}

fn default_reactions() -> HashMap<String, String> {
    string_map(&[
        ("hc1_status", "room1_temp_req"),
        ("hc2_status", "room2_temp_req"),
    ])
}

fn default_reaction_delay_ms() -> u64 {
    2000
}

fn default_ignored_commands() -> Vec<CommandKind> {
    vec![CommandKind::Query]
}

fn default_extra_monitored() -> HashMap<String, Option<u64>> {
    let mut extra = HashMap::new();
    extra.insert("room2_req_comfort_temp".to_string(), None);
    extra.insert("room2_req_reduced_temp".to_string(), None);
    extra
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            discovery_prefix: default_discovery_prefix(),
            group_id: default_group_id(),
            device_info: default_device_info(),
            templates: HashMap::new(),
            items: default_items(),
            translations: default_translations(),
            corrections: default_corrections(),
            requests: default_requests(),
            reactions: default_reactions(),
            reaction_delay_ms: default_reaction_delay_ms(),
            ignored_commands: default_ignored_commands(),
            extra_monitored: default_extra_monitored(),
        }
    }
}

impl SyncConfig {
    /// Topic builder for this namespace.
    pub fn topics(&self) -> TopicBuilder {
        TopicBuilder::new(&self.prefix, &self.discovery_prefix, &self.group_id)
    }

    /// Name translation table.
    pub fn names(&self) -> NameMap {
        NameMap::new(
            &self.translations,
            self.items.iter().map(|item| item.name.as_str()),
        )
    }

    /// Resolve every item against the template library.
    pub fn resolve_items(&self) -> Result<Vec<Item>> {
        let library = TemplateLibrary::builtin(&self.device_info).with_custom(&self.templates);
        Ok(library.resolve_all(&self.items)?)
    }

    /// Driver monitoring table: item poll intervals plus the extra entries.
    pub fn monitored(&self) -> HashMap<String, Option<u64>> {
        let mut monitored: HashMap<String, Option<u64>> = self
            .items
            .iter()
            .map(|item| (item.name.clone(), item.poll_interval_secs))
            .collect();
        for (name, interval) in &self.extra_monitored {
            monitored.insert(name.clone(), *interval);
        }
        monitored
    }
}

/// Event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Buffer definitions
    #[serde(default = "default_filters")]
    pub filters: Vec<FilterSpec>,

    /// Info telegram names left out of `inf` buffers
    #[serde(default = "default_info_denylist")]
    pub info_denylist: Vec<String>,

    /// Known payloads left out of `unk` buffers, per telegram name
    #[serde(default = "default_benign_payloads")]
    pub benign_payloads: HashMap<String, Vec<Vec<u8>>>,

    /// Optional append-only telegram log file
    #[serde(default)]
    pub record_path: Option<String>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            filters: default_filters(),
            info_denylist: default_info_denylist(),
            benign_payloads: default_benign_payloads(),
            record_path: None,
        }
    }
}

impl EventLogConfig {
    /// Compile the filters for a controller address.
    pub fn telegram_filter(&self, own_address: u8) -> TelegramFilter {
        TelegramFilter::new(own_address, &self.info_denylist, &self.benign_payloads)
    }
}

/// Diagnostic HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: "0.0.0.0:8008")
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Whether to run the server
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_listen() -> String {
    "0.0.0.0:8008".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            enabled: true,
        }
    }
}

/// Simulated boiler driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Controller bus address (default: 0x42)
    #[serde(default = "default_own_address")]
    pub own_address: u8,

    /// Boiler bus address (default: 0x00)
    #[serde(default)]
    pub boiler_address: u8,

    /// Driver scheduler tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Set the boiler clock to local time after start
    #[serde(default = "default_true")]
    pub sync_clock_on_start: bool,
}

fn default_own_address() -> u8 {
    0x42
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            own_address: default_own_address(),
            boiler_address: 0,
            tick_ms: default_tick_ms(),
            sync_clock_on_start: true,
        }
    }
}

impl BsbBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: BsbBridgeConfig = bsb_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.prefix.trim_matches('/').is_empty() {
            return Err(BridgeError::validation("bridge.prefix cannot be empty"));
        }

        if self.bridge.discovery_prefix.trim_matches('/').is_empty() {
            return Err(BridgeError::validation(
                "bridge.discovery_prefix cannot be empty",
            ));
        }

        let mut item_names = HashSet::new();
        for item in &self.bridge.items {
            if item.name.is_empty() {
                return Err(BridgeError::validation("Item name cannot be empty"));
            }
            if !item_names.insert(item.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate item '{}'",
                    item.name
                )));
            }
            if item.poll_interval_secs == Some(0) {
                return Err(BridgeError::validation(format!(
                    "Item '{}': poll_interval_secs must be positive",
                    item.name
                )));
            }
        }

        let mut targets = HashMap::new();
        for (device, broker) in &self.bridge.translations {
            if let Some(other) = targets.insert(broker.as_str(), device.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Translations '{}' and '{}' both map to '{}'",
                    other, device, broker
                )));
            }
        }

        // Surfaces unknown template references
        self.bridge.resolve_items()?;

        let mut filter_names = HashSet::new();
        for filter in &self.eventlog.filters {
            if filter.capacity == 0 {
                return Err(BridgeError::validation(format!(
                    "Filter '{}': capacity must be positive",
                    filter.name
                )));
            }
            if !filter_names.insert(filter.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate filter '{}'",
                    filter.name
                )));
            }
        }

        if self.http.enabled && self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(BridgeError::validation(format!(
                "http.listen: invalid address '{}'",
                self.http.listen
            )));
        }

        if self.mqtt.retry_delay_secs == 0 {
            return Err(BridgeError::validation(
                "mqtt.retry_delay_secs must be positive",
            ));
        }

        if self.device.tick_ms == 0 {
            return Err(BridgeError::validation("device.tick_ms must be positive"));
        }

        Ok(())
    }
}
