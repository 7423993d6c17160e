//! Device driver interface.
//!
//! The bridge never talks to the bus directly. It consumes a driver through
//! [`BoilerDevice`]: value reads and writes, the monitored item table, and two
//! observer registration points (raw telegrams and decoded values).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::telegram::{CommandKind, Telegram};

/// Errors reported by a device driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The driver has no value with this name.
    #[error("Unknown value: {0}")]
    UnknownValue(String),

    /// The device refused the request.
    #[error("Request for '{name}' rejected: {reason}")]
    Rejected { name: String, reason: String },

    /// The driver has not been started or was stopped.
    #[error("Device driver is not running")]
    NotRunning,

    /// The bus did not answer in time or the transport failed.
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Callback receiving every parsed telegram.
pub type EventListener = Arc<dyn Fn(&Telegram) + Send + Sync>;

/// Callback receiving decoded `(name, value)` pairs.
pub type ValueListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// A field device driver as seen by the bridge.
///
/// Listener callbacks are invoked synchronously from the driver's own
/// execution context and must not block.
pub trait BoilerDevice: Send + Sync + 'static {
    /// Read a value from the device.
    ///
    /// The answer is also delivered to value listeners.
    fn get_value(&self, name: &str) -> impl Future<Output = Result<Value, DeviceError>> + Send;

    /// Write a value to the device, optionally with an explicit command kind.
    fn set_value(
        &self,
        name: &str,
        value: Value,
        command: Option<CommandKind>,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Replace the table of periodically polled values.
    ///
    /// `None` marks a value that is known but never polled.
    fn set_monitored(&self, items: HashMap<String, Option<u64>>);

    /// Start the driver.
    fn start(&self) -> Result<(), DeviceError>;

    /// Stop the driver. Idempotent.
    fn stop(&self);

    /// Register a telegram observer.
    fn add_event_listener(&self, listener: EventListener) -> ListenerHandle;

    /// Register a decoded value observer.
    fn add_value_listener(&self, listener: ValueListener) -> ListenerHandle;
}

struct Slots<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<T>)>,
}

/// Registry of observers, for use by driver implementations.
///
/// Cloning yields another handle to the same registry.
pub struct Listeners<T: ?Sized> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: ?Sized> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the handle is dropped.
    pub fn add(&self, listener: Arc<T>) -> ListenerHandle {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, listener));
            id
        };

        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        ListenerHandle {
            remove: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Copy of the current listeners, in registration order.
    ///
    /// Callers invoke the snapshot outside the registry lock so a listener
    /// may register or drop handles while being notified.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.slots
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Listeners<dyn Fn(&Telegram) + Send + Sync> {
    /// Deliver a telegram to every registered event listener.
    pub fn emit(&self, telegram: &Telegram) {
        for listener in self.snapshot() {
            listener(telegram);
        }
    }
}

impl Listeners<dyn Fn(&str, &Value) + Send + Sync> {
    /// Deliver a decoded value to every registered value listener.
    pub fn emit(&self, name: &str, value: &Value) {
        for listener in self.snapshot() {
            listener(name, value);
        }
    }
}

/// Deregistration handle returned by listener registration.
///
/// Dropping the handle removes the listener.
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Remove the listener now.
    pub fn remove(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
