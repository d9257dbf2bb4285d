//! MQTT transport: every message is published to one topic.

use async_trait::async_trait;
use relay_core::{
    EventSink, RelayError, RelayResult, Transport, TransportFactory, TransportOptions,
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Capacity of the client's request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Options for the `mqtt` protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttTransportOptions {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub topic: String,
    /// Defaults to `relay-<uuid>`
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl MqttTransportOptions {
    fn qos(&self) -> Option<QoS> {
        match self.qos {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), String> {
        if self.topic.is_empty() {
            return Err("topic must not be empty".to_string());
        }
        if self.qos().is_none() {
            return Err(format!("qos must be 0, 1 or 2, got {}", self.qos));
        }
        if self.keep_alive_secs < 5 {
            return Err("keepAliveSecs must be at least 5".to_string());
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("username and password must be set together".to_string());
        }
        Ok(())
    }
}

pub struct MqttFactory;

impl MqttFactory {
    fn parse(options: &TransportOptions) -> RelayResult<MqttTransportOptions> {
        let parsed: MqttTransportOptions = options.parse()?;
        parsed
            .check()
            .map_err(|reason| RelayError::InvalidOptions {
                destination: options.destination.clone(),
                reason,
            })?;
        Ok(parsed)
    }
}

impl TransportFactory for MqttFactory {
    fn validate(&self, options: &TransportOptions) -> RelayResult<()> {
        Self::parse(options).map(|_| ())
    }

    fn create(
        &self,
        options: &TransportOptions,
        events: EventSink,
    ) -> RelayResult<Box<dyn Transport>> {
        Ok(Box::new(MqttTransport::new(Self::parse(options)?, events)))
    }
}

/// Publisher over a `rumqttc` client. The event loop runs on its own task
/// and is what actually talks to the broker.
pub struct MqttTransport {
    options: MqttTransportOptions,
    qos: QoS,
    events: EventSink,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new(options: MqttTransportOptions, events: EventSink) -> Self {
        Self {
            qos: options.qos().unwrap_or(QoS::AtLeastOnce),
            options,
            events,
            client: None,
            event_loop: None,
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) {
        let client_id = self
            .options
            .client_id
            .clone()
            .unwrap_or_else(|| format!("relay-{}", Uuid::new_v4()));

        let mut mqtt_options =
            MqttOptions::new(client_id, self.options.host.clone(), self.options.port);
        mqtt_options.set_keep_alive(Duration::from_secs(self.options.keep_alive_secs));
        if let (Some(username), Some(password)) = (&self.options.username, &self.options.password)
        {
            mqtt_options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let events = self.events.clone();

        self.event_loop = Some(tokio::spawn(async move {
            let mut acknowledged = false;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            events.failed(format!("broker refused connection: {:?}", ack.code));
                            break;
                        }
                        acknowledged = true;
                        events.connected();
                    }
                    Ok(event) => debug!(?event, "MQTT event"),
                    Err(e) => {
                        if acknowledged {
                            events.disconnected(e.to_string());
                        } else {
                            events.failed(e.to_string());
                        }
                        // Polling again would reconnect on its own; the backend owns retries.
                        break;
                    }
                }
            }
        }));
        self.client = Some(client);
    }

    async fn send(&mut self, message: &[u8]) -> RelayResult<()> {
        let client = self.client.as_ref().ok_or(RelayError::NotConnected)?;
        client
            .publish(
                self.options.topic.clone(),
                self.qos,
                self.options.retain,
                message.to_vec(),
            )
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
    }
}
