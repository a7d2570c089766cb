use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::EventLoop;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

/// Inbound publish on one of the subscribed topics
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker connection owned by a single device instance. Tests drive the
/// instance through `MockMqttClient`.
#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// `retain` is set for every status field
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// None once the connection is gone for good
    async fn poll_message(&mut self) -> Option<MqttMessage>;
}

/// In-memory bus: replays queued messages in order and records publishes
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    pub messages: std::collections::VecDeque<MqttMessage>,
    pub subscriptions: Vec<String>,
    pub published: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<u8>, bool)>>>,
    pub is_connected: bool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        self.messages.pop_front()
    }
}

#[cfg(test)]
impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message
    pub fn add_message(&mut self, topic: &str, payload: &str) {
        self.messages.push_back(MqttMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    /// Payloads published to `topic`, oldest first
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

/// Broker connection over rumqttc. The event loop runs on its own task and
/// forwards publishes through a channel; it is aborted on drop.
pub struct RumqttcClient {
    mqtt_options: MqttOptions,
    /// Set by `connect`
    client: Option<AsyncClient>,
    message_rx: Option<mpsc::UnboundedReceiver<MqttMessage>>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    pub fn new(config: &MqttConfig, client_id: impl Into<String>) -> anyhow::Result<Self> {
        let mut mqtt_options = MqttOptions::new(client_id, config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // The code catalog of a TV runs to a few hundred entries
        mqtt_options.set_max_packet_size(256 * 1024, 256 * 1024);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(Self {
            mqtt_options,
            client: None,
            message_rx: None,
            event_loop_task: None,
        })
    }

    fn connected_client(&self) -> Result<&AsyncClient, Box<dyn Error + Send>> {
        self.client.as_ref().ok_or_else(|| -> Box<dyn Error + Send> {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected to the MQTT broker",
            ))
        })
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let (client, event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_publishes(
            event_loop,
            message_tx,
            self.mqtt_options.client_id(),
        ));

        self.client = Some(client);
        self.message_rx = Some(message_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.connected_client()?
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;

        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        self.connected_client()?
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;

        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Drive the rumqttc event loop, handing inbound publishes to the device.
/// rumqttc reconnects on the next poll after an error.
async fn forward_publishes(
    mut event_loop: EventLoop,
    messages: mpsc::UnboundedSender<MqttMessage>,
    client_id: String,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = MqttMessage {
                    topic: publish.topic.to_string(),
                    payload: publish.payload.to_vec(),
                };
                if messages.send(msg).is_err() {
                    // Device instance is gone
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::debug!("[{}] MQTT connected", client_id);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[{}] MQTT connection error: {}", client_id, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    tracing::debug!("[{}] MQTT event loop stopped", client_id);
}
