//! Item catalog and Home Assistant discovery templates.
//!
//! Items name the boiler values the bridge mirrors. Each item references an
//! ordered list of template fragments; fragments are merged left to right,
//! then the item's inline metadata is applied on top.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// JSON object used for discovery metadata.
pub type Metadata = Map<String, Value>;

/// Errors raised while resolving an item against the template library.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Item '{item}' references unknown template '{template}'")]
    UnknownTemplate { item: String, template: String },
}

/// Home Assistant entity component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Read-only sensor (default).
    #[default]
    Sensor,
    /// Numeric input.
    Number,
    /// Option list.
    Select,
    /// On/off switch.
    Switch,
    /// Momentary push button.
    Button,
}

impl Component {
    /// Return the discovery topic segment for this component.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::Number => "number",
            Component::Select => "select",
            Component::Switch => "switch",
            Component::Button => "button",
        }
    }
}

/// Configuration of one mirrored boiler value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Device-side value name.
    pub name: String,

    /// Poll interval in seconds; `None` for request-only values.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    /// Template fragments, merged in order.
    #[serde(default)]
    pub template: Vec<String>,

    /// Inline metadata applied after the fragments.
    #[serde(default)]
    pub metadata: Metadata,

    /// Entity component (default: sensor).
    #[serde(default)]
    pub component: Component,
}

impl ItemConfig {
    fn new(name: &str, poll_interval_secs: Option<u64>, template: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            poll_interval_secs,
            template: template.iter().map(|t| t.to_string()).collect(),
            metadata: Metadata::new(),
            component: Component::Sensor,
        }
    }

    fn component(mut self, component: Component) -> Self {
        self.component = component;
        self
    }

    fn metadata(mut self, metadata: Value) -> Self {
        if let Value::Object(map) = metadata {
            self.metadata = map;
        }
        self
    }
}

/// An item with its metadata template fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Device-side value name.
    pub name: String,
    /// Poll interval in seconds; `None` for request-only values.
    pub poll_interval_secs: Option<u64>,
    /// Resolved discovery metadata template.
    pub metadata: Metadata,
    /// Entity component.
    pub component: Component,
}

/// Merge `overlay` into `base`, overlay keys winning.
pub fn merge(base: &mut Metadata, overlay: &Metadata) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

fn object(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn merged(parts: &[&Metadata]) -> Metadata {
    let mut out = Metadata::new();
    for part in parts {
        merge(&mut out, part);
    }
    out
}

/// Default device block shown by Home Assistant.
pub fn default_device_info() -> Metadata {
    object(json!({
        "identifiers": ["boiler"],
        "name": "Boiler",
        "model": "Nuvola Platinum+ 24",
        "manufacturer": "Baxi",
    }))
}

/// Named metadata fragments.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    fragments: HashMap<String, Metadata>,
}

impl TemplateLibrary {
    /// Build the built-in fragments around a device block.
    pub fn builtin(device_info: &Metadata) -> Self {
        let prec = |digits: u32| object(json!({ "sug_dsp_prc": digits }));

        let base = object(json!({
            "stat_t": "~/state",
            "platform": "mqtt",
            "device": Value::Object(device_info.clone()),
        }));
        let temp = merged(&[
            &base,
            &object(json!({
                "unit_of_measurement": "\u{b0}C",
                "device_class": "temperature",
            })),
        ]);
        let meas = merged(&[&temp, &prec(2), &object(json!({ "state_class": "measurement" }))]);
        let power_factor = object(json!({
            "device_class": "power_factor",
            "unit_of_measurement": "%",
        }));
        let total_increasing =
            merged(&[&prec(0), &object(json!({ "state_class": "total_increasing" }))]);
        let energy = object(json!({
            "device_class": "energy",
            "unit_of_measurement": "kWh",
        }));
        let pressure = merged(&[
            &prec(1),
            &object(json!({
                "device_class": "pressure",
                "unit_of_measurement": "bar",
            })),
        ]);
        let req = object(json!({ "cmd_t": "~/set" }));
        let req_temp = merged(&[
            &prec(2),
            &req,
            &object(json!({ "min": 18, "max": 25, "step": 0.5 })),
        ]);

        let mut fragments = HashMap::new();
        fragments.insert("prec0".to_string(), prec(0));
        fragments.insert("prec1".to_string(), prec(1));
        fragments.insert("prec2".to_string(), prec(2));
        fragments.insert("base".to_string(), base);
        fragments.insert("temp".to_string(), temp);
        fragments.insert("meas".to_string(), meas);
        fragments.insert("power_factor".to_string(), power_factor);
        fragments.insert("total_increasing".to_string(), total_increasing);
        fragments.insert("energy".to_string(), energy);
        fragments.insert("pressure".to_string(), pressure);
        fragments.insert("req".to_string(), req);
        fragments.insert("req_temp".to_string(), req_temp);

        Self { fragments }
    }

    /// Add or replace fragments.
    pub fn with_custom(mut self, custom: &HashMap<String, Metadata>) -> Self {
        for (name, fragment) in custom {
            self.fragments.insert(name.clone(), fragment.clone());
        }
        self
    }

    /// Look up a fragment by name.
    pub fn get(&self, name: &str) -> Option<&Metadata> {
        self.fragments.get(name)
    }

    /// Resolve an item's template list into its final metadata.
    pub fn resolve(&self, item: &ItemConfig) -> Result<Item, CatalogError> {
        let mut metadata = Metadata::new();

        for name in &item.template {
            let fragment = self.get(name).ok_or_else(|| CatalogError::UnknownTemplate {
                item: item.name.clone(),
                template: name.clone(),
            })?;
            merge(&mut metadata, fragment);
        }
        merge(&mut metadata, &item.metadata);

        Ok(Item {
            name: item.name.clone(),
            poll_interval_secs: item.poll_interval_secs,
            metadata,
            component: item.component,
        })
    }

    /// Resolve a whole catalog.
    pub fn resolve_all(&self, items: &[ItemConfig]) -> Result<Vec<Item>, CatalogError> {
        items.iter().map(|item| self.resolve(item)).collect()
    }
}

/// Heating circuit operating modes.
const HC_MODES: [&str; 4] = ["protection", "automatic", "reduced", "comfort"];

/// The built-in boiler catalog.
pub fn default_items() -> Vec<ItemConfig> {
    let modes = json!({ "options": HC_MODES });
    let rampup = json!({ "min": 30, "max": 60, "step": 2 });

    vec![
        ItemConfig::new("room1_temp", Some(600), &["meas"]),
        ItemConfig::new("room2_temp", Some(600), &["meas"]),
        ItemConfig::new("outer_temp", Some(600), &["meas"]),
        ItemConfig::new("boiler_temp", Some(60), &["temp", "prec2"]),
        ItemConfig::new("boiler_return_temp", Some(60), &["temp", "prec2"]),
        ItemConfig::new("flue_temp", Some(60), &["temp", "prec2"]),
        ItemConfig::new("boiler_water_temp", Some(60), &["temp", "prec2"]),
        ItemConfig::new("pump_modulation_pct", Some(60), &["base", "power_factor"]),
        ItemConfig::new("burner_modulation_pct", Some(60), &["base", "power_factor"]),
        ItemConfig::new("burner_start_count", Some(300), &["base", "total_increasing"]),
        ItemConfig::new(
            "gas_consumption",
            Some(300),
            &["base", "total_increasing", "energy"],
        ),
        ItemConfig::new("water_pressure", Some(300), &["meas", "pressure"]),
        ItemConfig::new("hc_boiler_status", Some(30), &["base"]),
        ItemConfig::new("hc1_mode", Some(60), &["base"]),
        ItemConfig::new("hc2_mode", Some(60), &["base"]),
        ItemConfig::new("room1_temp_req", None, &["temp", "req_temp"]).component(Component::Number),
        ItemConfig::new("room2_temp_req", None, &["temp", "req_temp"]).component(Component::Number),
        ItemConfig::new("hc1_operating_mode", None, &["base", "req"])
            .metadata(modes.clone())
            .component(Component::Select),
        ItemConfig::new("hc2_operating_mode", None, &["base", "req"])
            .metadata(modes)
            .component(Component::Select),
        ItemConfig::new("hc2_enabled", None, &["base", "req"]).component(Component::Switch),
        ItemConfig::new("hot_water_push", None, &["base", "req"]).component(Component::Button),
        ItemConfig::new("hc1_rampup_max_temp", None, &["temp", "req_temp"])
            .metadata(rampup.clone())
            .component(Component::Number),
        ItemConfig::new("hc2_rampup_max_temp", None, &["temp", "req_temp"])
            .metadata(rampup)
            .component(Component::Number),
    ]
}
