//! Simulated boiler driver.
//!
//! Behaves like a controller attached to the boiler bus: answers reads from
//! a value table, acknowledges writes, polls monitored values on their
//! interval with a little drift, and emits the unsolicited status telegrams
//! a real boiler broadcasts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bsb_common::device::{EventListener, ListenerHandle, Listeners, ValueListener};
use bsb_common::{BoilerDevice, CommandKind, DeviceError, Telegram};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::DeviceConfig;

/// Broadcast destination of info telegrams.
const BROADCAST: u8 = 0x7F;
/// Bus address of the room unit.
const ROOM_UNIT: u8 = 0x06;
/// Ticks between two unsolicited status telegrams.
const STATUS_EVERY_TICKS: u64 = 10;

fn seed_values() -> HashMap<String, Value> {
    let seed = [
        ("room1_temp", json!(20.5)),
        ("room2_temp", json!(19.75)),
        ("room1_temp_status", json!(20.5)),
        ("outer_temp", json!(8.25)),
        ("boiler_temp", json!(54.2)),
        ("boiler_return_temp", json!(45.1)),
        ("flue_temp", json!(61.0)),
        ("boiler_water_temp", json!(48.5)),
        ("pump_modulation_pct", Value::Null),
        ("burner_modulation_pct", json!(35.0)),
        ("burner_start_count", json!(12873)),
        ("gas_consumption", json!(5421)),
        ("water_pressure", json!(1.6)),
        ("hc_boiler_status", json!("Heating mode comfort")),
        ("hc1_mode", json!("Comfort")),
        ("hc2_mode", json!("Reduced")),
        ("room1_temp_req", json!(21.0)),
        ("room2_temp_req", json!(19.0)),
        ("room2_req_comfort_temp", json!(21.0)),
        ("room2_req_reduced_temp", json!(18.0)),
        ("hc1_operating_mode", json!("automatic")),
        ("hc2_operating_mode", json!("automatic")),
        ("hc2_enabled", json!(true)),
        ("hot_water_push", json!(false)),
        ("hc1_rampup_max_temp", json!(50.0)),
        ("hc2_rampup_max_temp", json!(45.0)),
        ("datetime", json!("")),
    ];

    seed.into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Data bytes for a value, in the bus' 1/64 fixed-point layout for numbers.
fn encode_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => vec![0x01],
        Value::Bool(b) => vec![0x00, u8::from(*b)],
        Value::Number(n) => {
            let fixed = (n.as_f64().unwrap_or_default() * 64.0).round() as i32;
            let bytes = fixed.to_be_bytes();
            vec![0x00, bytes[2], bytes[3]]
        }
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn frame(source: u8, destination: u8, command: CommandKind, payload: &[u8]) -> Vec<u8> {
    let code = match command {
        CommandKind::Info => 0x02,
        CommandKind::Set => 0x03,
        CommandKind::Ack => 0x04,
        CommandKind::Nack => 0x05,
        CommandKind::Query => 0x06,
        CommandKind::Answer => 0x07,
        CommandKind::Error => 0x08,
    };

    let mut raw = vec![0xDC, source | 0x80, destination, (payload.len() + 5) as u8, code];
    raw.extend_from_slice(payload);
    raw
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

struct SimState {
    values: HashMap<String, Value>,
    monitored: HashMap<String, Option<u64>>,
    last_poll: HashMap<String, Instant>,
    rng: SmallRng,
    ticks: u64,
}

impl SimState {
    /// Names whose poll interval has elapsed, marking them polled.
    fn due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (name, interval) in &self.monitored {
            let Some(secs) = interval else { continue };
            let elapsed = self
                .last_poll
                .get(name)
                .is_none_or(|last| now.duration_since(*last) >= Duration::from_secs(*secs));
            if elapsed {
                due.push(name.clone());
            }
        }
        for name in &due {
            self.last_poll.insert(name.clone(), now);
        }
        due
    }

    fn drift(&mut self, name: &str) {
        let step = if name.ends_with("_temp") && !name.contains("_req") {
            0.25
        } else if name.ends_with("_pct") {
            2.0
        } else {
            return;
        };

        let current = match self.values.get(name) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
            _ => return,
        };
        let delta = self.rng.random_range(-step..step);
        let next = round2(current + delta).max(0.0);
        self.values.insert(name.to_string(), json!(next));
    }

    fn status_telegram(&mut self, boiler: u8) -> Telegram {
        match self.ticks / STATUS_EVERY_TICKS % 5 {
            0 => {
                let state = if self.rng.random_range(0..8) == 0 { 0x50 } else { 0x45 };
                Telegram::new(boiler, BROADCAST, CommandKind::Info, "hc1_status", vec![0, state])
            }
            1 => {
                let state = if self.rng.random_range(0..2) == 0 { 0x45 } else { 0x4d };
                Telegram::new(boiler, BROADCAST, CommandKind::Info, "hot_water_status", vec![0, state])
            }
            2 => {
                let first = [0x00, 0x04, 0x14, 0x08][self.rng.random_range(0..4)];
                Telegram::new(
                    boiler,
                    BROADCAST,
                    CommandKind::Info,
                    "status_msg1",
                    vec![first, 0, 0, 0x59],
                )
            }
            3 => {
                let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                Telegram::new(boiler, BROADCAST, CommandKind::Info, "datetime", now.clone().into_bytes())
                    .with_value(json!(now))
            }
            _ => {
                let value = self
                    .values
                    .get("room1_temp")
                    .cloned()
                    .unwrap_or(Value::Null);
                Telegram::new(
                    ROOM_UNIT,
                    BROADCAST,
                    CommandKind::Info,
                    "room1_temp_status",
                    encode_payload(&value),
                )
                .with_value(value)
            }
        }
    }
}

struct Inner {
    own_address: u8,
    boiler_address: u8,
    tick: Duration,
    state: Mutex<SimState>,
    running: AtomicBool,
    events: Listeners<dyn Fn(&Telegram) + Send + Sync>,
    values: Listeners<dyn Fn(&str, &Value) + Send + Sync>,
}

impl Inner {
    fn emit(&self, telegram: Telegram) {
        let raw = frame(
            telegram.source,
            telegram.destination,
            telegram.command,
            &telegram.payload,
        );
        self.events.emit(&telegram.with_raw(raw));
    }

    fn ensure_running(&self) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotRunning)
        }
    }

    fn read(&self, name: &str) -> Result<Value, DeviceError> {
        let value = self
            .state
            .lock()
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownValue(name.to_string()))?;

        self.emit(Telegram::new(
            self.own_address,
            self.boiler_address,
            CommandKind::Query,
            name,
            Vec::new(),
        ));
        self.emit(
            Telegram::new(
                self.boiler_address,
                self.own_address,
                CommandKind::Answer,
                name,
                encode_payload(&value),
            )
            .with_value(value.clone()),
        );
        self.values.emit(name, &value);

        Ok(value)
    }

    fn write(&self, name: &str, value: Value, command: Option<CommandKind>) {
        self.state
            .lock()
            .values
            .insert(name.to_string(), value.clone());

        let payload = encode_payload(&value);
        match command.unwrap_or(CommandKind::Set) {
            CommandKind::Info => {
                self.emit(
                    Telegram::new(self.own_address, BROADCAST, CommandKind::Info, name, payload)
                        .with_value(value.clone()),
                );
            }
            command => {
                self.emit(
                    Telegram::new(self.own_address, self.boiler_address, command, name, payload)
                        .with_value(value.clone()),
                );
                self.emit(Telegram::new(
                    self.boiler_address,
                    self.own_address,
                    CommandKind::Ack,
                    name,
                    Vec::new(),
                ));
            }
        }
        self.values.emit(name, &value);
    }

    fn tick(&self) {
        let (due, status) = {
            let mut state = self.state.lock();
            state.ticks += 1;

            let due = state.due(Instant::now());
            for name in &due {
                state.drift(name);
            }
            let status = (state.ticks % STATUS_EVERY_TICKS == 0)
                .then(|| state.status_telegram(self.boiler_address));
            (due, status)
        };

        for name in due {
            if let Err(e) = self.read(&name) {
                debug!(name = %name, error = %e, "Monitored value not available");
            }
        }
        if let Some(telegram) = status {
            self.emit(telegram);
        }
    }
}

/// In-process boiler standing in for the bus driver.
pub struct SimulatedBoiler {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedBoiler {
    /// Create a stopped simulator.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                own_address: config.own_address,
                boiler_address: config.boiler_address,
                tick: Duration::from_millis(config.tick_ms.max(1)),
                state: Mutex::new(SimState {
                    values: seed_values(),
                    monitored: HashMap::new(),
                    last_poll: HashMap::new(),
                    rng: SmallRng::from_os_rng(),
                    ticks: 0,
                }),
                running: AtomicBool::new(false),
                events: Listeners::new(),
                values: Listeners::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Whether the driver is started.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl BoilerDevice for SimulatedBoiler {
    async fn get_value(&self, name: &str) -> Result<Value, DeviceError> {
        self.inner.ensure_running()?;
        self.inner.read(name)
    }

    async fn set_value(
        &self,
        name: &str,
        value: Value,
        command: Option<CommandKind>,
    ) -> Result<(), DeviceError> {
        self.inner.ensure_running()?;
        self.inner.write(name, value, command);
        Ok(())
    }

    fn set_monitored(&self, items: HashMap<String, Option<u64>>) {
        let mut state = self.inner.state.lock();
        state.last_poll.retain(|name, _| items.contains_key(name));
        state.monitored = items;
    }

    fn start(&self) -> Result<(), DeviceError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        *task = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(inner.tick);
            loop {
                interval.tick().await;
                inner.tick();
            }
        }));

        info!(
            own_address = %format!("{:#04x}", self.inner.own_address),
            "Simulated boiler started"
        );
        Ok(())
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            self.inner.running.store(false, Ordering::SeqCst);
            info!("Simulated boiler stopped");
        }
    }

    fn add_event_listener(&self, listener: EventListener) -> ListenerHandle {
        self.inner.events.add(listener)
    }

    fn add_value_listener(&self, listener: ValueListener) -> ListenerHandle {
        self.inner.values.add(listener)
    }
}

impl Drop for SimulatedBoiler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
