//! End-to-end tests wiring the bridge to the simulated boiler.
//!
//! No broker is involved: the bridge's outbox is drained directly.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use bsb_common::{BoilerDevice, CommandKind, Telegram};
use mqtt_bridge_bsb::config::{BsbBridgeConfig, DeviceConfig};
use mqtt_bridge_bsb::http::create_router;
use mqtt_bridge_bsb::{EventLogStore, LogQuery, Outgoing, SimulatedBoiler, SyncBridge};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;

struct Harness {
    config: BsbBridgeConfig,
    device: Arc<SimulatedBoiler>,
    bridge: Arc<SyncBridge<SimulatedBoiler>>,
    store: Arc<EventLogStore>,
    outbox: mpsc::UnboundedReceiver<Outgoing>,
    _listeners: Vec<bsb_common::ListenerHandle>,
}

fn harness() -> Harness {
    let config = BsbBridgeConfig {
        device: DeviceConfig {
            tick_ms: 60_000,
            ..Default::default()
        },
        ..Default::default()
    };
    config.validate().expect("default config must validate");

    let device = Arc::new(SimulatedBoiler::new(&config.device));
    let store = Arc::new(EventLogStore::new(
        config.eventlog.telegram_filter(config.device.own_address),
        &config.eventlog.filters,
    ));
    let listener = {
        let store = store.clone();
        device.add_event_listener(Arc::new(move |t: &Telegram| store.record(t)))
    };

    let items = config.bridge.resolve_items().expect("catalog resolves");
    let (tx, outbox) = mpsc::unbounded_channel();
    let bridge = Arc::new(SyncBridge::new(device.clone(), &config.bridge, items, tx));

    device.start().expect("simulator starts");

    Harness {
        config,
        device,
        bridge,
        store,
        outbox,
        _listeners: vec![listener],
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn drain(outbox: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
    let mut messages = Vec::new();
    while let Ok(message) = outbox.try_recv() {
        messages.push(message);
    }
    messages
}

fn state_of<'a>(messages: &'a [Outgoing], name: &str) -> Vec<&'a str> {
    let topic = format!("home/boiler/{}/state", name);
    messages
        .iter()
        .filter(|m| m.topic == topic)
        .map(|m| std::str::from_utf8(&m.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn test_connect_announces_then_mirrors_every_item() {
    let mut h = harness();

    h.bridge.on_connect();
    settle().await;
    let messages = drain(&mut h.outbox);

    let item_count = h.config.bridge.items.len();
    let (discovery, rest) = messages.split_at(item_count);
    assert!(discovery.iter().all(|m| m.topic.ends_with("/config") && m.retain));
    assert!(rest.iter().all(|m| m.topic.ends_with("/state") && m.retain));
    assert_eq!(rest.len(), item_count);

    assert!(
        discovery
            .iter()
            .any(|m| m.topic == "homeassistant/select/boiler/hc1_operating_mode/config")
    );
    assert_eq!(state_of(rest, "outside_temperature"), vec!["8.25"]);
    assert_eq!(state_of(rest, "boiler_heating_status"), vec!["Heating mode comfort"]);
    assert_eq!(state_of(rest, "hc2_enabled"), vec!["ON"]);
    assert_eq!(state_of(rest, "pump_modulation_pct"), vec!["0"]);
    assert!(state_of(rest, "outer_temp").is_empty());

    h.device.stop();
}

#[tokio::test]
async fn test_command_round_trip() {
    let mut h = harness();
    h.bridge.on_connect();
    settle().await;
    drain(&mut h.outbox);

    h.bridge
        .handle_command("home/boiler/room1_temp_req/set", b"22.5")
        .await;
    h.bridge
        .handle_command("home/boiler/hc2_enabled/set", b"OFF")
        .await;
    h.bridge
        .handle_command("home/boiler/boiler_temp/set", b"90")
        .await;

    let messages = drain(&mut h.outbox);
    assert_eq!(state_of(&messages, "room1_temp_req"), vec!["22.5"]);
    assert_eq!(state_of(&messages, "hc2_enabled"), vec!["OFF"]);
    assert!(state_of(&messages, "boiler_temp").is_empty());

    assert_eq!(
        h.device.get_value("boiler_temp").await.unwrap(),
        json!(54.2)
    );
    h.device.stop();
}

#[tokio::test]
async fn test_event_log_sees_bus_traffic() {
    let mut h = harness();
    h.bridge.on_connect();
    settle().await;
    drain(&mut h.outbox);

    h.device
        .set_value("hot_water_status", json!(null), Some(CommandKind::Info))
        .await
        .unwrap();

    let result = h.store.query(&LogQuery {
        logs: Some(vec!["all".to_string(), "nol".to_string()]),
        include: vec!["boiler_temp".to_string()],
        exclude: vec![],
    });
    let all = &result.iter().find(|(n, _)| n == "all").unwrap().1;
    let nol = &result.iter().find(|(n, _)| n == "nol").unwrap().1;

    // the answer to our own query only
    assert_eq!(all.len(), 1);
    assert!(all[0].contains("ANS boiler_temp"));
    assert!(nol.is_empty());

    let inf = h.store.snapshot("inf").unwrap();
    assert!(inf.iter().any(|t| t.name == "hot_water_status"));
    h.device.stop();
}

#[tokio::test]
async fn test_http_reads_through_to_device() {
    let h = harness();
    let router = create_router(h.device.clone(), h.store.clone());

    let response = router
        .oneshot(Request::get("/?get=outer_temp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(value, json!(8.25));
    h.device.stop();
}
