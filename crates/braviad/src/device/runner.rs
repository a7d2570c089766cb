use anyhow::anyhow;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Device;
use crate::bravia::DeviceClient;
use crate::bus::MqttClient;
use crate::bus::MqttMessage;

impl<D: DeviceClient, B: MqttClient> Device<D, B> {
    /// Run the instance until `shutdown` flips to true.
    ///
    /// Polls immediately, then waits the poll interval after each completed
    /// tick, so ticks never overlap. Drain ticks and inbound commands are
    /// handled between poll ticks on the same task.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("[{}] Connecting to MQTT broker", self.host);
        self.bus
            .connect()
            .await
            .map_err(|e| anyhow!("[{}] MQTT connect failed: {}", self.host, e))?;

        let commands = self.topics.commands();
        self.bus
            .subscribe(&commands)
            .await
            .map_err(|e| anyhow!("[{}] MQTT subscribe to {} failed: {}", self.host, commands, e))?;
        info!("[{}] Listening for commands on {}", self.host, commands);

        let mut next_poll = Instant::now();
        let mut bus_open = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(next_poll) => {
                    self.poll_once().await;
                    next_poll = Instant::now() + self.settings.poll_interval;
                }
                _ = self.queue.tick() => {
                    self.drain_once().await;
                }
                msg = self.bus.poll_message(), if bus_open => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        warn!("[{}] MQTT message stream closed, no more commands", self.host);
                        bus_open = false;
                    }
                },
            }
        }

        if !self.queue.is_empty() {
            warn!(
                "[{}] Dropping {} unsent commands on shutdown",
                self.host,
                self.queue.len()
            );
        }
        info!("[{}] Stopped", self.host);
        Ok(())
    }

    async fn handle_message(&mut self, msg: MqttMessage) {
        if !self.topics.is_command(&msg.topic) {
            debug!("[{}] Ignoring message on {}", self.host, msg.topic);
            return;
        }

        match std::str::from_utf8(&msg.payload) {
            Ok(text) => self.submit(text.trim()).await,
            Err(e) => warn!(
                "[{}] Ignoring non UTF-8 command on {}: {}",
                self.host, msg.topic, e
            ),
        }
    }
}
