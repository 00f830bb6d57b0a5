use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use rumqttc::v5::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions,
    mqttbytes::QoS,
    mqttbytes::v5::{LastWill, Packet, Publish},
};

use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::command::Dispatcher;
use crate::config::MqttConfig;
use crate::error::{Error, ErrorKind, Result};

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// Pause before polling the event loop again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// Default port of an unencrypted broker.
const DEFAULT_PORT: u16 = 1883;

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

/// A sink for outbound bus messages.
pub trait Publisher {
    /// Publishes a `JSON` payload on the given topic.
    fn publish(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

fn quality_of_service(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn broker_address(url: &str) -> Result<(String, u16)> {
    let url = Url::parse(url)
        .map_err(|e| Error::new(ErrorKind::Config, format!("Invalid MQTT url {url}: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| Error::new(ErrorKind::Config, format!("MQTT url {url} has no host")))?;

    Ok((host.to_owned(), url.port().unwrap_or(DEFAULT_PORT)))
}

/// Topics used by the gateway on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Topics {
    base: String,
    commands: String,
    bridge_info: Option<String>,
}

impl Topics {
    fn new(config: &MqttConfig) -> Self {
        let base = config.topic.trim_end_matches('/').to_owned();
        Self {
            commands: format!("{base}/+/set"),
            bridge_info: config.bridge_info.then(|| config.bridge_info_topic()),
            base,
        }
    }

    fn outbound(&self, topic: &str) -> String {
        format!("{}/{topic}", self.base)
    }

    // Strips the base topic, returning `None` for foreign topics.
    fn inbound<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// An `MQTT` connection to the broker.
#[derive(Debug, Clone)]
pub struct MqttBus {
    client: AsyncClient,
    topics: Topics,
    qos: QoS,
    retain: bool,
}

impl MqttBus {
    /// Creates the broker client along with the event loop driving it.
    ///
    /// No network traffic happens until [`Self::run_command_loop`] polls the
    /// event loop.
    ///
    /// # Errors
    ///
    /// An error is returned if the broker `URL` is invalid.
    pub fn connect(config: &MqttConfig) -> Result<(Self, EventLoop)> {
        let (host, port) = broker_address(&config.url)?;
        let topics = Topics::new(config);
        let qos = quality_of_service(config.qos);

        let mut mqttoptions = MqttOptions::new(config.client_id.as_str(), host, port);
        let _ = mqttoptions.set_keep_alive(KEEP_ALIVE_TIME);

        if let Some(username) = &config.username {
            let _ = mqttoptions.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        if let Some(bridge_info) = &topics.bridge_info {
            let _ = mqttoptions.set_last_will(LastWill::new(
                bridge_info.clone(),
                OFFLINE,
                qos,
                true,
                None,
            ));
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, ASYNC_CHANNEL_CAPACITY);

        Ok((
            Self {
                client,
                topics,
                qos,
                retain: config.retain,
            },
            eventloop,
        ))
    }

    /// Starts the task driving the broker connection.
    ///
    /// On every connection acknowledgement the task subscribes to the command
    /// topic and announces the gateway state. Each inbound command is handed
    /// to the [`Dispatcher`] on its own task, so slow actor operations never
    /// stall the connection.
    ///
    /// The task stops when the `cancellation_token` is cancelled.
    #[must_use]
    pub fn run_command_loop(
        &self,
        eventloop: EventLoop,
        dispatcher: Arc<Dispatcher>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run_event_loop(
            self.clone(),
            eventloop,
            dispatcher,
            cancellation_token,
        ))
    }

    /// Announces the gateway as offline and closes the connection.
    ///
    /// # Errors
    ///
    /// An error is returned if the disconnection cannot be requested.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(bridge_info) = &self.topics.bridge_info {
            self.client
                .publish(bridge_info.clone(), self.qos, true, OFFLINE)
                .await?;
        }
        self.client.disconnect().await?;
        Ok(())
    }

    fn on_connected(&self) {
        info!("Connected to the MQTT broker");

        if let Err(e) = self
            .client
            .try_subscribe(self.topics.commands.clone(), self.qos)
        {
            error!(
                "Impossible to subscribe to topic {}: {e}",
                self.topics.commands
            );
        }

        if let Some(bridge_info) = &self.topics.bridge_info
            && let Err(e) = self
                .client
                .try_publish(bridge_info.clone(), self.qos, true, ONLINE)
        {
            error!("Impossible to publish the bridge state: {e}");
        }
    }

    fn on_publish(&self, publish: &Publish, dispatcher: &Arc<Dispatcher>) {
        let Ok(topic) = std::str::from_utf8(&publish.topic) else {
            warn!("Topic is not valid UTF-8, discard it");
            return;
        };

        let Some(topic) = self.topics.inbound(topic) else {
            warn!("Message on foreign topic {topic}, discard it");
            return;
        };

        let topic = topic.to_owned();
        let payload = publish.payload.to_vec();
        let dispatcher = Arc::clone(dispatcher);
        let _ = tokio::spawn(async move {
            dispatcher.put_message(&topic, &payload).await;
        });
    }
}

impl Publisher for MqttBus {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
        let payload = serde_json::to_vec(payload)?;
        self.client
            .publish(self.topics.outbound(topic), self.qos, self.retain, payload)
            .await?;
        Ok(())
    }
}

async fn run_event_loop(
    bus: MqttBus,
    mut eventloop: EventLoop,
    dispatcher: Arc<Dispatcher>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            // Poll the `MQTT` event coming from the network
            event = eventloop.poll() => {
                handle_event(&bus, event, &dispatcher).await;
            }
        }
    }
    drop(eventloop);
    drop(bus);
}

async fn handle_event(
    bus: &MqttBus,
    event: std::result::Result<Event, ConnectionError>,
    dispatcher: &Arc<Dispatcher>,
) {
    match event {
        Ok(Event::Incoming(Packet::ConnAck(_))) => bus.on_connected(),
        Ok(Event::Incoming(Packet::Publish(publish))) => bus.on_publish(&publish, dispatcher),
        Ok(event) => debug!("MQTT event ignored: {event:?}"),
        Err(e) => {
            error!("Error in the MQTT connection, reconnecting: {e}");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}
