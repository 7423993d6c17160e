//! MQTT bridge for BSB boiler controllers.
//!
//! Mirrors boiler values to MQTT with Home Assistant discovery, accepts
//! commands from the broker and serves a diagnostic HTTP interface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bsb_common::{BoilerDevice, LoggingConfig, Telegram};
use clap::Parser;
use mqtt_bridge_bsb::config::BsbBridgeConfig;
use mqtt_bridge_bsb::recorder::TelegramRecorder;
use mqtt_bridge_bsb::relay::EventRelay;
use mqtt_bridge_bsb::{EventLogStore, MqttSession, QueryServer, SimulatedBoiler, SyncBridge};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// MQTT bridge for BSB boiler controllers.
#[derive(Parser, Debug)]
#[command(name = "mqtt-bridge-bsb")]
#[command(about = "Mirrors a BSB boiler to MQTT with Home Assistant discovery")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "bsb.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = BsbBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    bsb_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting mqtt-bridge-bsb");
    info!("Loaded configuration from {:?}", args.config);

    let items = config
        .bridge
        .resolve_items()
        .context("Failed to resolve item catalog")?;

    // Boiler driver
    let device = Arc::new(SimulatedBoiler::new(&config.device));
    device.set_monitored(config.bridge.monitored());

    // Telegram consumers
    let store = Arc::new(EventLogStore::new(
        config.eventlog.telegram_filter(config.device.own_address),
        &config.eventlog.filters,
    ));
    let mut listeners = Vec::new();
    {
        let store = store.clone();
        listeners.push(device.add_event_listener(Arc::new(move |t: &Telegram| store.record(t))));
    }

    if let Some(path) = &config.eventlog.record_path {
        let recorder = TelegramRecorder::open(path)
            .with_context(|| format!("Failed to open telegram log {}", path))?;
        info!(path = %recorder.path().display(), "Recording telegrams");
        listeners.push(device.add_event_listener(Arc::new(move |t: &Telegram| recorder.record(t))));
    }

    let relay = Arc::new(EventRelay::new(
        device.clone(),
        &config.bridge,
        tokio::runtime::Handle::current(),
    ));
    listeners.push(relay.attach());

    // Diagnostic HTTP server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let http_task = if config.http.enabled {
        let addr: SocketAddr = config
            .http
            .listen
            .parse()
            .with_context(|| format!("Invalid http.listen address {}", config.http.listen))?;
        let server = QueryServer::new(device.clone(), store.clone(), addr);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_rx).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    device.start().context("Failed to start boiler driver")?;

    if config.device.sync_clock_on_start {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        if let Err(e) = device.set_value("datetime", Value::from(now), None).await {
            warn!(error = %e, "Failed to set boiler clock");
        }
    }

    // Broker session
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SyncBridge::new(
        device.clone(),
        &config.bridge,
        items,
        outbox_tx,
    ));
    let session = MqttSession::new(bridge, config.mqtt.clone());

    info!(
        items = config.bridge.items.len(),
        prefix = %config.bridge.prefix,
        "BSB bridge running"
    );

    let result = tokio::select! {
        result = session.run_forever(outbox_rx) => result.context("MQTT session failed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
            Ok(())
        }
    };

    device.stop();
    let _ = shutdown_tx.send(true);
    if let Some(task) = http_task {
        let _ = task.await;
    }
    drop(listeners);

    info!("BSB bridge stopped");
    result
}
