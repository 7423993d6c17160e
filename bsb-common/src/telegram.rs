use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Role of a telegram on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Request for a value.
    Query,
    /// Reply to a query.
    Answer,
    /// Unsolicited information push.
    Info,
    /// Write request.
    Set,
    /// Write acknowledged.
    Ack,
    /// Write refused.
    Nack,
    /// Error reply.
    Error,
}

impl CommandKind {
    /// Short protocol mnemonic for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Query => "QUR",
            CommandKind::Answer => "ANS",
            CommandKind::Info => "INF",
            CommandKind::Set => "SET",
            CommandKind::Ack => "ACK",
            CommandKind::Nack => "NACK",
            CommandKind::Error => "ERR",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed message unit from the field bus.
///
/// Telegrams are produced by the device driver and shared read-only
/// with every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telegram {
    /// Sender bus address.
    pub source: u8,

    /// Receiver bus address.
    pub destination: u8,

    /// Telegram role.
    pub command: CommandKind,

    /// Semantic name of the addressed value (e.g. "boiler_temp").
    pub name: String,

    /// Data bytes carried by the telegram.
    pub payload: Vec<u8>,

    /// Whole frame as received on the bus.
    pub raw: Vec<u8>,

    /// Decoded value, when the driver knows how to decode the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Reception time.
    pub timestamp: DateTime<Utc>,
}

impl Telegram {
    /// Create a telegram stamped with the current time.
    ///
    /// The raw frame defaults to the payload; drivers that keep the full
    /// frame set it with [`with_raw`](Self::with_raw).
    pub fn new(
        source: u8,
        destination: u8,
        command: CommandKind,
        name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            source,
            destination,
            command,
            name: name.into(),
            raw: payload.clone(),
            payload,
            value: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the decoded value.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach the raw frame bytes.
    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = raw;
        self
    }

    /// Override the reception time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reception time as fractional Unix epoch seconds.
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64 / 1000.0
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02X}->{:02X} {} {} [",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.source,
            self.destination,
            self.command,
            self.name
        )?;

        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        f.write_str("]")?;

        if let Some(value) = &self.value {
            write!(f, " = {}", value)?;
        }

        Ok(())
    }
}

/// One line of the append-only telegram log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramRecord {
    /// Unix epoch seconds.
    pub timestamp: f64,
    /// Raw frame bytes.
    pub telegram_raw: Vec<u8>,
}

impl From<&Telegram> for TelegramRecord {
    fn from(telegram: &Telegram) -> Self {
        Self {
            timestamp: telegram.epoch_seconds(),
            telegram_raw: telegram.raw.clone(),
        }
    }
}
