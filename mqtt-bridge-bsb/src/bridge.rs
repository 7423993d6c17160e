//! Bidirectional mirror between the boiler and the broker.
//!
//! Device → broker: decoded values are translated, corrected, deduplicated
//! and published as retained state. Broker → device: `<prefix>/<name>/set`
//! commands pass the request table and are forwarded to the device setter.
//!
//! The value path is synchronous: it runs inside device listener callbacks
//! and only ever enqueues [`Outgoing`] messages, never awaits the broker.

use std::collections::HashMap;
use std::sync::Arc;

use bsb_common::{BoilerDevice, CommandKind, ListenerHandle, Telegram, TopicBuilder};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::catalog::Item;
use crate::config::SyncConfig;
use crate::transform::{Correction, NameMap, RequestDecoder, state_payload, values_equal};

/// A message queued for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Outgoing {
    /// A retained message.
    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

/// Mirror state of one broker entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedValue {
    /// Last value published, after correction.
    pub last_published: Option<Value>,
    /// Whether discovery has been announced for this entity.
    pub enabled: bool,
}

/// The state mirror and command router.
pub struct SyncBridge<D: BoilerDevice> {
    device: Arc<D>,
    topics: TopicBuilder,
    names: NameMap,
    corrections: HashMap<String, Correction>,
    requests: HashMap<String, RequestDecoder>,
    items: Vec<Item>,
    state: Mutex<HashMap<String, ObservedValue>>,
    listeners: Mutex<Vec<ListenerHandle>>,
    outbox: mpsc::UnboundedSender<Outgoing>,
}

impl<D: BoilerDevice> SyncBridge<D> {
    /// Create a bridge publishing through `outbox`.
    pub fn new(
        device: Arc<D>,
        config: &SyncConfig,
        items: Vec<Item>,
        outbox: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self {
            device,
            topics: config.topics(),
            names: config.names(),
            corrections: config.corrections.clone(),
            requests: config.requests.clone(),
            items,
            state: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            outbox,
        }
    }

    /// The device behind the bridge.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Topic layout used by this bridge.
    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Mirrored items.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Mirror state of a broker entity.
    pub fn observed(&self, broker_name: &str) -> Option<ObservedValue> {
        self.state.lock().get(broker_name).cloned()
    }

    /// Broker session established.
    ///
    /// Registers the device listeners (first call only), announces and
    /// enables every item, then requests a fresh reading of each. The caller
    /// subscribes to the namespace beforehand.
    pub fn on_connect(self: &Arc<Self>) {
        self.register_listeners();
        self.announce_items();
        self.request_initial_values();
    }

    fn register_listeners(self: &Arc<Self>) {
        let mut listeners = self.listeners.lock();
        if !listeners.is_empty() {
            return;
        }

        let bridge = Arc::downgrade(self);
        listeners.push(
            self.device
                .add_value_listener(Arc::new(move |name: &str, value: &Value| {
                    if let Some(bridge) = bridge.upgrade() {
                        bridge.handle_value(name, value);
                    }
                })),
        );

        let bridge = Arc::downgrade(self);
        listeners.push(
            self.device
                .add_event_listener(Arc::new(move |telegram: &Telegram| {
                    if let Some(bridge) = bridge.upgrade() {
                        bridge.handle_telegram(telegram);
                    }
                })),
        );

        debug!("Device listeners registered");
    }

    /// Queue discovery for every item and enable it, as one step under
    /// the state lock so no value event can slip in between.
    fn announce_items(&self) {
        let mut state = self.state.lock();

        for item in &self.items {
            let name = self.names.to_broker(&item.name);
            match self.discovery_message(item) {
                Ok(message) => self.send(message),
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to encode discovery payload");
                    continue;
                }
            }
            state.entry(name.to_string()).or_default().enabled = true;
        }

        debug!(count = self.items.len(), "Discovery queued");
    }

    fn request_initial_values(&self) {
        for item in &self.items {
            let device = self.device.clone();
            let name = item.name.clone();
            tokio::spawn(async move {
                if let Err(e) = device.get_value(&name).await {
                    warn!(name = %name, error = %e, "Initial read failed");
                }
            });
        }
    }

    /// Discovery message for an item.
    pub fn discovery_message(&self, item: &Item) -> Result<Outgoing, serde_json::Error> {
        let name = self.names.to_broker(&item.name);

        let mut payload = item.metadata.clone();
        payload.insert("~".to_string(), Value::from(self.topics.base(name)));
        payload.insert("name".to_string(), Value::from(name));
        payload.insert("uniq_id".to_string(), Value::from(name));

        Ok(Outgoing::retained(
            self.topics.discovery(item.component.as_str(), name),
            serde_json::to_vec(&payload)?,
        ))
    }

    /// Device → broker value path.
    pub fn handle_value(&self, device_name: &str, value: &Value) {
        let name = self.names.to_broker(device_name);

        let mut state = self.state.lock();
        let Some(observed) = state.get_mut(name).filter(|o| o.enabled) else {
            trace!(name = %name, "Value for disabled entity dropped");
            return;
        };

        let value = match self.corrections.get(name) {
            Some(correction) => correction.apply(value),
            None => value.clone(),
        };

        if observed
            .last_published
            .as_ref()
            .is_some_and(|last| values_equal(last, &value))
        {
            return;
        }

        debug!(name = %name, value = %value, "Publishing state");
        self.send(Outgoing::retained(
            self.topics.state(name),
            state_payload(&value),
        ));
        observed.last_published = Some(value);
    }

    /// Feed unsolicited info telegrams into the value path.
    pub fn handle_telegram(&self, telegram: &Telegram) {
        if telegram.command != CommandKind::Info {
            return;
        }
        if let Some(value) = &telegram.value {
            self.handle_value(&telegram.name, value);
        }
    }

    /// Check a broker message against the request table and decode it.
    ///
    /// Returns the device-side name and the decoded value, or `None` when
    /// the message is not an authorized, decodable command.
    pub fn resolve_command(&self, topic: &str, payload: &[u8]) -> Option<(String, Value)> {
        let broker_name = self.topics.parse_set(topic)?;
        let device_name = self.names.to_device(broker_name);

        let Some(decoder) = self.requests.get(device_name) else {
            debug!(topic = %topic, "Command for non-writable value ignored");
            return None;
        };

        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Command payload is not UTF-8");
                return None;
            }
        };

        match decoder.decode(text) {
            Ok(value) => Some((device_name.to_string(), value)),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping undecodable command");
                None
            }
        }
    }

    /// Broker → device command path.
    pub async fn handle_command(&self, topic: &str, payload: &[u8]) {
        let Some((name, value)) = self.resolve_command(topic, payload) else {
            return;
        };

        debug!(name = %name, value = %value, "Forwarding command to device");
        if let Err(e) = self.device.set_value(&name, value, None).await {
            warn!(name = %name, error = %e, "Device rejected command");
        }
    }

    fn send(&self, message: Outgoing) {
        if self.outbox.send(message).is_err() {
            debug!("Outbox closed, message dropped");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{Component, Metadata};
    use bsb_common::device::{EventListener, Listeners, ValueListener};
    use bsb_common::DeviceError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recording device double.
    #[derive(Default)]
    pub(crate) struct RecordingDevice {
        pub gets: Mutex<Vec<String>>,
        pub sets: Mutex<Vec<(String, Value, Option<CommandKind>)>>,
        pub values: HashMap<String, Value>,
        pub events: Listeners<dyn Fn(&Telegram) + Send + Sync>,
        pub value_listeners: Listeners<dyn Fn(&str, &Value) + Send + Sync>,
        pub stops: AtomicUsize,
    }

    impl BoilerDevice for RecordingDevice {
        async fn get_value(&self, name: &str) -> Result<Value, DeviceError> {
            self.gets.lock().push(name.to_string());
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| DeviceError::UnknownValue(name.to_string()))
        }

        async fn set_value(
            &self,
            name: &str,
            value: Value,
            command: Option<CommandKind>,
        ) -> Result<(), DeviceError> {
            self.sets.lock().push((name.to_string(), value, command));
            Ok(())
        }

        fn set_monitored(&self, _items: HashMap<String, Option<u64>>) {}

        fn start(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn add_event_listener(&self, listener: EventListener) -> ListenerHandle {
            self.events.add(listener)
        }

        fn add_value_listener(&self, listener: ValueListener) -> ListenerHandle {
            self.value_listeners.add(listener)
        }
    }

    fn item(name: &str, component: Component) -> Item {
        let mut metadata = Metadata::new();
        metadata.insert("stat_t".to_string(), json!("~/state"));
        metadata.insert("name".to_string(), json!("template name"));
        Item {
            name: name.to_string(),
            poll_interval_secs: Some(60),
            metadata,
            component,
        }
    }

    fn bridge_with(
        items: Vec<Item>,
    ) -> (
        Arc<SyncBridge<RecordingDevice>>,
        Arc<RecordingDevice>,
        mpsc::UnboundedReceiver<Outgoing>,
    ) {
        let device = Arc::new(RecordingDevice::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(SyncBridge::new(
            device.clone(),
            &SyncConfig::default(),
            items,
            tx,
        ));
        (bridge, device, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn states(messages: &[Outgoing]) -> Vec<(String, String)> {
        messages
            .iter()
            .filter(|m| m.topic.ends_with("/state"))
            .map(|m| {
                (
                    m.topic.clone(),
                    String::from_utf8_lossy(&m.payload).into_owned(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dedup_publishes_changes_only() {
        let (bridge, device, mut rx) = bridge_with(vec![item("boiler_temp", Component::Sensor)]);
        bridge.on_connect();
        drain(&mut rx);

        for value in [54.2, 54.2, 55.0] {
            device.value_listeners.emit("boiler_temp", &json!(value));
        }

        let published = states(&drain(&mut rx));
        assert_eq!(
            published,
            vec![
                ("home/boiler/boiler_temp/state".to_string(), "54.2".to_string()),
                ("home/boiler/boiler_temp/state".to_string(), "55.0".to_string()),
            ]
        );
        assert!(drain(&mut rx).is_empty());
        assert!(
            bridge
                .observed("boiler_temp")
                .unwrap()
                .last_published
                .is_some_and(|v| v == json!(55.0))
        );
    }

    #[tokio::test]
    async fn test_integer_float_equal() {
        let (bridge, _device, mut rx) = bridge_with(vec![item("burner_start_count", Component::Sensor)]);
        bridge.on_connect();
        drain(&mut rx);

        bridge.handle_value("burner_start_count", &json!(54));
        bridge.handle_value("burner_start_count", &json!(54.0));

        assert_eq!(states(&drain(&mut rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_values_before_connect_dropped() {
        let (bridge, _device, mut rx) = bridge_with(vec![item("boiler_temp", Component::Sensor)]);

        bridge.handle_value("boiler_temp", &json!(54.2));
        assert!(drain(&mut rx).is_empty());
        assert!(bridge.observed("boiler_temp").is_none());
    }

    #[tokio::test]
    async fn test_unlisted_value_dropped() {
        let (bridge, _device, mut rx) = bridge_with(vec![item("boiler_temp", Component::Sensor)]);
        bridge.on_connect();
        drain(&mut rx);

        bridge.handle_value("flue_temp", &json!(61.0));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_discovery_payload_and_order() {
        let (bridge, _device, mut rx) = bridge_with(vec![
            item("outer_temp", Component::Sensor),
            item("hc2_enabled", Component::Switch),
        ]);
        bridge.on_connect();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].topic,
            "homeassistant/sensor/boiler/outside_temperature/config"
        );
        assert_eq!(messages[1].topic, "homeassistant/switch/boiler/hc2_enabled/config");
        assert!(messages.iter().all(|m| m.retain));

        let payload: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(payload["~"], "home/boiler/outside_temperature");
        assert_eq!(payload["name"], "outside_temperature");
        assert_eq!(payload["uniq_id"], "outside_temperature");
        assert_eq!(payload["stat_t"], "~/state");
    }

    #[tokio::test]
    async fn test_translation_and_corrections() {
        let (bridge, _device, mut rx) = bridge_with(vec![
            item("outer_temp", Component::Sensor),
            item("hc2_enabled", Component::Switch),
            item("pump_modulation_pct", Component::Sensor),
        ]);
        bridge.on_connect();
        drain(&mut rx);

        bridge.handle_value("outer_temp", &json!(8.25));
        bridge.handle_value("hc2_enabled", &json!(true));
        bridge.handle_value("pump_modulation_pct", &Value::Null);

        let published = states(&drain(&mut rx));
        assert_eq!(
            published,
            vec![
                (
                    "home/boiler/outside_temperature/state".to_string(),
                    "8.25".to_string()
                ),
                ("home/boiler/hc2_enabled/state".to_string(), "ON".to_string()),
                (
                    "home/boiler/pump_modulation_pct/state".to_string(),
                    "0".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_info_telegram_feeds_value_path() {
        let (bridge, device, mut rx) = bridge_with(vec![item("room1_temp", Component::Sensor)]);
        bridge.on_connect();
        drain(&mut rx);

        let status = Telegram::new(0x06, 0x7F, CommandKind::Info, "room1_temp_status", vec![0, 5])
            .with_value(json!(20.5));
        device.events.emit(&status);

        let answer = Telegram::new(0x00, 0x42, CommandKind::Answer, "room1_temp", vec![0, 5])
            .with_value(json!(21.0));
        device.events.emit(&answer);

        assert_eq!(
            states(&drain(&mut rx)),
            vec![("home/boiler/room1_temp/state".to_string(), "20.5".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reconnect_registers_listeners_once() {
        let (bridge, device, mut rx) = bridge_with(vec![item("boiler_temp", Component::Sensor)]);
        bridge.on_connect();
        bridge.on_connect();

        assert_eq!(device.value_listeners.len(), 1);
        assert_eq!(device.events.len(), 1);

        let discovery = drain(&mut rx)
            .into_iter()
            .filter(|m| m.topic.ends_with("/config"))
            .count();
        assert_eq!(discovery, 2);
    }

    #[tokio::test]
    async fn test_connect_requests_every_item() {
        let (bridge, device, _rx) = bridge_with(vec![
            item("boiler_temp", Component::Sensor),
            item("flue_temp", Component::Sensor),
        ]);
        bridge.on_connect();

        for _ in 0..10 {
            if device.gets.lock().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let mut gets = device.gets.lock().clone();
        gets.sort();
        assert_eq!(gets, vec!["boiler_temp", "flue_temp"]);
    }

    #[tokio::test]
    async fn test_command_switch_on() {
        let (bridge, device, _rx) = bridge_with(vec![]);

        bridge.handle_command("home/boiler/hc2_enabled/set", b"ON").await;
        bridge.handle_command("home/boiler/hc2_enabled/set", b"OFF").await;

        assert_eq!(
            *device.sets.lock(),
            vec![
                ("hc2_enabled".to_string(), json!(true), None),
                ("hc2_enabled".to_string(), json!(false), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_command_authorization_gate() {
        let (bridge, device, _rx) = bridge_with(vec![]);

        bridge.handle_command("home/boiler/boiler_temp/set", b"80").await;
        bridge.handle_command("home/boiler/room2_temp_req/set", b"20").await;
        bridge.handle_command("home/boiler/room1_temp_req/state", b"20").await;
        bridge.handle_command("elsewhere/room1_temp_req/set", b"20").await;

        assert!(device.sets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_command_decoding() {
        let (bridge, device, _rx) = bridge_with(vec![]);

        bridge.handle_command("home/boiler/room1_temp_req/set", b"21.5").await;
        bridge.handle_command("home/boiler/room1_temp_req/set", b"warm").await;
        bridge
            .handle_command("home/boiler/hc1_operating_mode/set", b"reduced")
            .await;
        bridge.handle_command("home/boiler/hot_water_push/set", b"PRESS").await;

        assert_eq!(
            *device.sets.lock(),
            vec![
                ("room1_temp_req".to_string(), json!(21.5), None),
                ("hc1_operating_mode".to_string(), json!("reduced"), None),
                ("hot_water_push".to_string(), json!(true), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_command_uses_device_name() {
        let device = Arc::new(RecordingDevice::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = SyncConfig::default();
        config
            .requests
            .insert("outer_temp".to_string(), RequestDecoder::Float);
        let bridge = SyncBridge::new(device.clone(), &config, vec![], tx);

        assert_eq!(
            bridge.resolve_command("home/boiler/outside_temperature/set", b"5"),
            Some(("outer_temp".to_string(), json!(5.0)))
        );
    }

    #[tokio::test]
    async fn test_dropped_bridge_ignores_events() {
        let (bridge, device, mut rx) = bridge_with(vec![item("boiler_temp", Component::Sensor)]);
        bridge.on_connect();
        drain(&mut rx);

        drop(bridge);
        // the listener handles went with the bridge
        assert!(device.value_listeners.is_empty());
        device.value_listeners.emit("boiler_temp", &json!(54.2));
    }
}
