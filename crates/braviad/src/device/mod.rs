//! Per-TV state synchronizer and command dispatcher.
//!
//! One [`Device`] runs per configured TV. It owns its Bravia client and its
//! MQTT connection; instances share nothing. Everything an instance does
//! (polling facets, resolving catalogs, draining the command queue, handling
//! inbound commands) runs as steps of the single task in [`Device::run`], so
//! no two of them interleave mid-step.

mod catalog;
mod dispatcher;
mod poller;
mod runner;
mod state;

use std::time::Duration;

use tracing::debug;
use tracing::warn;

pub use catalog::AppCatalog;
pub use catalog::Catalogs;
pub use catalog::CodeCatalog;
pub use catalog::POWER_ON;
pub use dispatcher::Command;
pub use dispatcher::CommandQueue;
pub use state::DeviceState;
pub use state::INPUT_OFF;

use crate::bravia::BraviaError;
use crate::bravia::DeviceClient;
use crate::bus::MqttClient;
use crate::bus::Topics;
use crate::config::BraviaConfig;
use crate::config::PowerFailurePolicy;

/// Timing and policy knobs of one instance
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub poll_interval: Duration,
    pub command_interval: Duration,
    pub power_failure: PowerFailurePolicy,
}

impl From<&BraviaConfig> for DeviceSettings {
    fn from(config: &BraviaConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            command_interval: config.command_interval,
            power_failure: config.power_failure,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            command_interval: Duration::from_millis(500),
            power_failure: PowerFailurePolicy::default(),
        }
    }
}

/// A TV bridged to the bus
pub struct Device<D: DeviceClient, B: MqttClient> {
    host: String,
    topics: Topics,
    client: D,
    bus: B,
    settings: DeviceSettings,
    state: DeviceState,
    catalogs: Catalogs,
    queue: CommandQueue,
    /// Serialized volume as last published
    last_volume: Option<String>,
}

impl<D: DeviceClient, B: MqttClient> Device<D, B> {
    pub fn new(
        host: impl Into<String>,
        topics: Topics,
        client: D,
        bus: B,
        settings: DeviceSettings,
    ) -> Self {
        let queue = CommandQueue::new(settings.command_interval);
        Self {
            host: host.into(),
            topics,
            client,
            bus,
            settings,
            state: DeviceState::default(),
            catalogs: Catalogs::default(),
            queue,
            last_volume: None,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Merge a patch into the published state and publish every facet it
    /// carries.
    pub async fn apply(&mut self, patch: DeviceState) {
        let fields = patch.fields();
        self.state.merge(patch);

        for (field, value) in fields {
            let topic = self.topics.status(&field);
            let payload = value.to_string();
            if let Err(e) = self.bus.publish(&topic, payload.as_bytes(), true).await {
                warn!("[{}] Failed to publish {}: {}", self.host, topic, e);
            }
        }
    }

    /// Report a failed facet fetch.
    ///
    /// Failures are expected while the TV is off or its state is unknown,
    /// so they are only surfaced when it was last seen on.
    fn facet_failed(&self, facet: &str, err: &BraviaError) {
        if self.state.is_on() {
            warn!("[{}] Failed to poll {}: {}", self.host, facet, err);
        } else {
            debug!("[{}] Failed to poll {} (TV off): {}", self.host, facet, err);
        }
    }
}
