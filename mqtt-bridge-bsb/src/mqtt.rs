//! Broker session: connection lifecycle, outbox pump and command worker.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bsb_common::{BoilerDevice, MqttConfig, TopicBuilder};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::{Outgoing, SyncBridge};
use crate::error::{BridgeError, Result};

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;
/// Payload of the availability topic while connected.
pub const ONLINE: &str = "online";
/// Last-will payload of the availability topic.
pub const OFFLINE: &str = "offline";

/// Build client options, with an `offline` last will on the availability topic.
pub fn mqtt_options(config: &MqttConfig, topics: &TopicBuilder) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);

    if let Some(user) = &config.username {
        options.set_credentials(user, config.password.clone().unwrap_or_default());
    }

    options.set_last_will(LastWill::new(
        topics.status(),
        OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    options
}

/// What to do after an event loop error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Wait and poll again; the client reconnects on the next poll.
    Retry,
    /// Give up.
    Fatal,
}

/// Classify an event loop error.
///
/// A refused TCP connection is always retried. Once a session has been
/// established, transport failures are retried as well. Anything else,
/// including a broker rejecting the CONNECT, is fatal.
pub fn classify(err: &ConnectionError, connected_once: bool) -> Disposition {
    match err {
        ConnectionError::Io(e) if e.kind() == ErrorKind::ConnectionRefused => Disposition::Retry,
        ConnectionError::ConnectionRefused(_)
        | ConnectionError::NotConnAck(_)
        | ConnectionError::RequestsDone => Disposition::Fatal,
        ConnectionError::Io(_)
        | ConnectionError::MqttState(_)
        | ConnectionError::NetworkTimeout
        | ConnectionError::FlushTimeout
            if connected_once =>
        {
            Disposition::Retry
        }
        _ => Disposition::Fatal,
    }
}

/// A broker session driving one [`SyncBridge`].
pub struct MqttSession<D: BoilerDevice> {
    bridge: Arc<SyncBridge<D>>,
    config: MqttConfig,
}

impl<D: BoilerDevice> MqttSession<D> {
    /// Create a session.
    pub fn new(bridge: Arc<SyncBridge<D>>, config: MqttConfig) -> Self {
        Self { bridge, config }
    }

    /// Run the event loop until a fatal error.
    ///
    /// Publishes everything received on `outbox` in order. On a fatal error
    /// the device is stopped before the error is returned.
    pub async fn run_forever(self, outbox: mpsc::UnboundedReceiver<Outgoing>) -> Result<()> {
        let options = mqtt_options(&self.config, self.bridge.topics());
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let publisher = client.clone();
        let pump_task = tokio::spawn(async move {
            if let Err(e) = pump(publisher, outbox).await {
                warn!(error = %e, "Outbox pump stopped");
            }
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(command_worker(self.bridge.clone(), commands_rx));

        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        let result = self.drive(client, eventloop, commands_tx).await;

        pump_task.abort();
        worker.abort();

        if let Err(e) = &result {
            error!(error = %e, "MQTT session ended");
            self.bridge.device().stop();
        }
        result
    }

    async fn drive(
        &self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        commands: mpsc::UnboundedSender<(String, Vec<u8>)>,
    ) -> Result<()> {
        let retry_delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut connected_once = false;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT broker connection acknowledged");
                    connected_once = true;
                    let (client, bridge) = (client.clone(), self.bridge.clone());
                    tokio::spawn(async move {
                        if let Err(e) = on_connect(client, bridge).await {
                            warn!(error = %e, "Connection setup failed");
                        }
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = (publish.topic.clone(), publish.payload.to_vec());
                    if commands.send(message).is_err() {
                        return Err(BridgeError::MqttConnection(
                            "command worker stopped".to_string(),
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => match classify(&e, connected_once) {
                    Disposition::Retry => {
                        warn!(
                            error = %e,
                            retry_in_secs = retry_delay.as_secs(),
                            "MQTT connection unavailable"
                        );
                        tokio::time::sleep(retry_delay).await;
                    }
                    Disposition::Fatal => return Err(BridgeError::MqttConnection(e.to_string())),
                },
            }
        }
    }
}

/// Per-connection setup: subscribe, announce availability, then let the
/// bridge announce its items.
async fn on_connect<D: BoilerDevice>(
    client: AsyncClient,
    bridge: Arc<SyncBridge<D>>,
) -> Result<()> {
    let topics = bridge.topics();

    client
        .subscribe(topics.namespace_wildcard(), QoS::AtMostOnce)
        .await?;
    client
        .publish(topics.status(), QoS::AtLeastOnce, true, ONLINE)
        .await?;

    bridge.on_connect();
    Ok(())
}

/// Publish queued messages in FIFO order.
///
/// Ends when the outbox closes or the client's request channel is gone.
async fn pump(client: AsyncClient, mut outbox: mpsc::UnboundedReceiver<Outgoing>) -> Result<()> {
    while let Some(message) = outbox.recv().await {
        debug!(topic = %message.topic, bytes = message.payload.len(), "Publishing");
        client
            .publish(message.topic, QoS::AtMostOnce, message.retain, message.payload)
            .await?;
    }
    Ok(())
}

/// Forward broker messages to the bridge one at a time, preserving order.
async fn command_worker<D: BoilerDevice>(
    bridge: Arc<SyncBridge<D>>,
    mut commands: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
) {
    while let Some((topic, payload)) = commands.recv().await {
        bridge.handle_command(&topic, &payload).await;
    }
}
