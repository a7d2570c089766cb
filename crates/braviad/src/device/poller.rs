use std::collections::BTreeMap;

use tracing::debug;

use super::state::INPUT_OFF;
use super::Device;
use super::DeviceState;
use crate::bravia::DeviceClient;
use crate::bus::MqttClient;
use crate::config::PowerFailurePolicy;

impl<D: DeviceClient, B: MqttClient> Device<D, B> {
    /// One polling tick.
    ///
    /// Catalogs come first, then power, volume and input. Every facet handles
    /// its own failure, so a failing facet never keeps the others from
    /// running.
    pub async fn poll_once(&mut self) {
        self.ensure_catalogs().await;
        self.poll_power().await;
        self.poll_volume().await;
        self.poll_input().await;
    }

    pub async fn poll_power(&mut self) {
        match self.client.fetch_power_status().await {
            Ok(status) => {
                let power = status.is_active();
                if self.state.power != Some(power) {
                    debug!("[{}] Power {}", self.host, status.status);
                }
                self.set_power(power).await;
            }
            Err(e) => {
                self.facet_failed("power", &e);
                if self.settings.power_failure == PowerFailurePolicy::Off {
                    self.set_power(false).await;
                }
            }
        }
    }

    /// Status topics are retained, so an unchanged value is not republished
    async fn set_power(&mut self, power: bool) {
        if self.state.power != Some(power) {
            self.apply(DeviceState::with_power(power)).await;
        }
    }

    async fn set_input(&mut self, input: &str) {
        if self.state.input.as_deref() != Some(input) {
            self.apply(DeviceState::with_input(input)).await;
        }
    }

    /// Publishes `volume` only when it differs from the last published value
    pub async fn poll_volume(&mut self) {
        let volume = match self.client.fetch_volume_info().await {
            Ok(volume) => volume,
            Err(e) => {
                self.facet_failed("volume", &e);
                return;
            }
        };

        let by_target: BTreeMap<_, _> = volume
            .into_iter()
            .map(|info| (info.target.clone(), info))
            .collect();

        let encoded = match serde_json::to_string(&by_target) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!("[{}] Failed to encode volume: {}", self.host, e);
                return;
            }
        };
        if self.last_volume.as_deref() == Some(encoded.as_str()) {
            return;
        }

        self.apply(DeviceState::with_volume(by_target)).await;
        self.last_volume = Some(encoded);
    }

    /// Skipped while the TV is off, publishing [`INPUT_OFF`] instead
    pub async fn poll_input(&mut self) {
        if !self.state.is_on() {
            self.set_input(INPUT_OFF).await;
            return;
        }

        match self.client.fetch_playing_content().await {
            Ok(content) => self.set_input(content.input_label()).await,
            Err(e) => self.facet_failed("input", &e),
        }
    }
}
