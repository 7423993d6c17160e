//! Value transforms applied between the device and the broker.
//!
//! - [`NameMap`] renames device values to broker entity names and back
//! - [`Correction`] adjusts values on the device → broker path
//! - [`RequestDecoder`] turns command payload text into device values
//! - [`DecodeStrategy`] is the ordered fallback chain for HTTP write-through

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bidirectional device ⇄ broker name translation.
///
/// Names missing from the table translate to themselves. A broker name that
/// is also a device value keeps its identity on the way back, so
/// `room1_temp_status → room1_temp` still routes `room1_temp` to itself.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    to_broker: HashMap<String, String>,
    to_device: HashMap<String, String>,
}

impl NameMap {
    /// Build from a device-name → broker-name table and the known device names.
    pub fn new<'a>(
        translations: &HashMap<String, String>,
        device_names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let device_names: HashSet<&str> = device_names.into_iter().collect();
        let to_broker = translations.clone();
        let to_device = translations
            .iter()
            .filter(|(device, broker)| device == broker || !device_names.contains(broker.as_str()))
            .map(|(device, broker)| (broker.clone(), device.clone()))
            .collect();

        Self {
            to_broker,
            to_device,
        }
    }

    /// Broker-facing name of a device value.
    pub fn to_broker<'a>(&'a self, device_name: &'a str) -> &'a str {
        self.to_broker
            .get(device_name)
            .map(String::as_str)
            .unwrap_or(device_name)
    }

    /// Device-side name of a broker entity.
    pub fn to_device<'a>(&'a self, broker_name: &'a str) -> &'a str {
        self.to_device
            .get(broker_name)
            .map(String::as_str)
            .unwrap_or(broker_name)
    }
}

/// Transform applied to a value before it is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    /// Replace a falsy value (null, false, 0, "") with 0.
    OrZero,
    /// Publish "ON" for truthy values and "OFF" otherwise.
    OnOff,
}

impl Correction {
    /// Apply the correction.
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Correction::OrZero => {
                if is_truthy(value) {
                    value.clone()
                } else {
                    Value::from(0)
                }
            }
            Correction::OnOff => {
                let state = if is_truthy(value) { "ON" } else { "OFF" };
                Value::from(state)
            }
        }
    }
}

/// Truthiness of a dynamic value: null, false, zero and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality of published values. Numbers compare by magnitude, so `54` equals `54.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Serialize a value as an MQTT state payload.
///
/// Strings go out as plain text, null as an empty payload, everything else as JSON.
pub fn state_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

/// Decoding failure for a command payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot decode '{text}' as {expected}")]
pub struct DecodeError {
    pub text: String,
    pub expected: &'static str,
}

/// Decoder for broker → device command payloads.
///
/// Presence of a decoder for a name is what authorizes writes to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDecoder {
    /// Forward the payload text unchanged.
    Text,
    /// Parse the payload as a floating point number.
    Float,
    /// `true` when the payload equals the token, `false` otherwise.
    Equals(String),
}

impl RequestDecoder {
    /// Decode a payload.
    pub fn decode(&self, text: &str) -> Result<Value, DecodeError> {
        match self {
            RequestDecoder::Text => Ok(Value::from(text)),
            RequestDecoder::Float => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| DecodeError {
                    text: text.to_string(),
                    expected: "float",
                }),
            RequestDecoder::Equals(token) => Ok(Value::Bool(text == token)),
        }
    }
}

/// One stage of the write-through value decoding chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Parse the text as JSON.
    Json,
    /// Parse the lower-cased text as JSON (accepts "True", "NULL", ...).
    LowercaseJson,
    /// Use the text itself as a string value.
    RawText,
}

/// Stages tried, in order, for write-through values.
pub const WRITE_THROUGH_STRATEGIES: [DecodeStrategy; 3] = [
    DecodeStrategy::Json,
    DecodeStrategy::LowercaseJson,
    DecodeStrategy::RawText,
];

impl DecodeStrategy {
    /// Try this stage.
    pub fn try_decode(&self, text: &str) -> Option<Value> {
        match self {
            DecodeStrategy::Json => serde_json::from_str(text).ok(),
            DecodeStrategy::LowercaseJson => serde_json::from_str(&text.to_lowercase()).ok(),
            DecodeStrategy::RawText => Some(Value::from(text)),
        }
    }
}

/// Decode write-through text with [`WRITE_THROUGH_STRATEGIES`]; never fails.
pub fn decode_text_value(text: &str) -> Value {
    WRITE_THROUGH_STRATEGIES
        .iter()
        .find_map(|strategy| strategy.try_decode(text))
        .unwrap_or_else(|| Value::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_map_both_directions() {
        let mut table = HashMap::new();
        table.insert("outer_temp".to_string(), "outside_temperature".to_string());
        table.insert(
            "hc_boiler_status".to_string(),
            "boiler_heating_status".to_string(),
        );
        let names = NameMap::new(&table, ["outer_temp", "boiler_temp"]);

        assert_eq!(names.to_broker("outer_temp"), "outside_temperature");
        assert_eq!(names.to_device("outside_temperature"), "outer_temp");
        assert_eq!(names.to_broker("boiler_temp"), "boiler_temp");
        assert_eq!(names.to_device("boiler_temp"), "boiler_temp");
    }

    #[test]
    fn test_name_map_target_that_is_a_device_value() {
        let mut table = HashMap::new();
        table.insert("room1_temp_status".to_string(), "room1_temp".to_string());
        let names = NameMap::new(&table, ["room1_temp", "room1_temp_req"]);

        assert_eq!(names.to_broker("room1_temp_status"), "room1_temp");
        assert_eq!(names.to_broker("room1_temp"), "room1_temp");
        assert_eq!(names.to_device("room1_temp"), "room1_temp");
    }

    #[test]
    fn test_or_zero() {
        let c = Correction::OrZero;
        assert_eq!(c.apply(&Value::Null), json!(0));
        assert_eq!(c.apply(&json!(false)), json!(0));
        assert_eq!(c.apply(&json!(0.0)), json!(0));
        assert_eq!(c.apply(&json!(42.5)), json!(42.5));
    }

    #[test]
    fn test_on_off() {
        let c = Correction::OnOff;
        assert_eq!(c.apply(&json!(true)), json!("ON"));
        assert_eq!(c.apply(&json!(1)), json!("ON"));
        assert_eq!(c.apply(&json!(false)), json!("OFF"));
        assert_eq!(c.apply(&Value::Null), json!("OFF"));
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(54), &json!(54.0)));
        assert!(!values_equal(&json!(54.2), &json!(55.0)));
        assert!(values_equal(&json!("ON"), &json!("ON")));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_state_payload() {
        assert_eq!(state_payload(&json!(54.2)), b"54.2".to_vec());
        assert_eq!(state_payload(&json!("ON")), b"ON".to_vec());
        assert_eq!(state_payload(&Value::Null), Vec::<u8>::new());
        assert_eq!(state_payload(&json!(true)), b"true".to_vec());
    }

    #[test]
    fn test_request_decoders() {
        assert_eq!(RequestDecoder::Float.decode("21.5"), Ok(json!(21.5)));
        assert!(RequestDecoder::Float.decode("warm").is_err());
        assert_eq!(RequestDecoder::Text.decode("reduced"), Ok(json!("reduced")));

        let on = RequestDecoder::Equals("ON".to_string());
        assert_eq!(on.decode("ON"), Ok(json!(true)));
        assert_eq!(on.decode("OFF"), Ok(json!(false)));
    }

    #[test]
    fn test_request_decoder_config_forms() {
        let decoders: HashMap<String, RequestDecoder> = json5::from_str(
            r#"{ room1_temp_req: "float", hc1_operating_mode: "text", hc2_enabled: { equals: "ON" } }"#,
        )
        .unwrap();

        assert_eq!(decoders["room1_temp_req"], RequestDecoder::Float);
        assert_eq!(decoders["hc1_operating_mode"], RequestDecoder::Text);
        assert_eq!(
            decoders["hc2_enabled"],
            RequestDecoder::Equals("ON".to_string())
        );
    }

    #[test]
    fn test_write_through_chain() {
        assert_eq!(decode_text_value("21.5"), json!(21.5));
        assert_eq!(decode_text_value("True"), json!(true));
        assert_eq!(decode_text_value("[1, 2]"), json!([1, 2]));
        assert_eq!(decode_text_value("automatic"), json!("automatic"));
        assert_eq!(decode_text_value(""), json!(""));
    }

    #[test]
    fn test_strategy_stages() {
        assert_eq!(DecodeStrategy::Json.try_decode("TRUE"), None);
        assert_eq!(DecodeStrategy::LowercaseJson.try_decode("TRUE"), Some(json!(true)));
        assert_eq!(DecodeStrategy::RawText.try_decode("TRUE"), Some(json!("TRUE")));
    }
}
