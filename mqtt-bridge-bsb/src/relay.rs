//! Diagnostic telegram log and delayed re-read reactions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bsb_common::{BoilerDevice, CommandKind, ListenerHandle, Telegram};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

/// Logs bus traffic and re-reads values that status telegrams may have changed.
pub struct EventRelay<D: BoilerDevice> {
    device: Arc<D>,
    ignored: HashSet<CommandKind>,
    reactions: HashMap<String, String>,
    delay: Duration,
    runtime: Handle,
}

impl<D: BoilerDevice> EventRelay<D> {
    /// Create a relay spawning its re-reads on `runtime`.
    pub fn new(device: Arc<D>, config: &SyncConfig, runtime: Handle) -> Self {
        Self {
            device,
            ignored: config.ignored_commands.iter().copied().collect(),
            reactions: config.reactions.clone(),
            delay: Duration::from_millis(config.reaction_delay_ms),
            runtime,
        }
    }

    /// Register with the device. The relay stays attached while the handle lives.
    pub fn attach(self: &Arc<Self>) -> ListenerHandle {
        let relay = self.clone();
        self.device
            .add_event_listener(Arc::new(move |telegram: &Telegram| relay.handle(telegram)))
    }

    /// Process one telegram.
    pub fn handle(&self, telegram: &Telegram) {
        if !self.ignored.contains(&telegram.command) {
            info!("{}", telegram);
        }

        if let Some(target) = self.reactions.get(&telegram.name) {
            self.schedule_read(target.clone());
        }
    }

    fn schedule_read(&self, name: String) {
        let device = self.device.clone();
        let delay = self.delay;

        debug!(name = %name, delay_ms = delay.as_millis() as u64, "Scheduling re-read");
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = device.get_value(&name).await {
                warn!(name = %name, error = %e, "Re-read failed");
            }
        });
    }
}
