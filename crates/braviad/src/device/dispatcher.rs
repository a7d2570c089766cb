//! Inbound commands and the outgoing IRCC queue.
//!
//! Queue states:
//! - Idle: queue empty, no drain timer.
//! - Draining: a drain timer is running; it pops one code per tick and is
//!   cancelled by the tick that leaves the queue empty.
//!
//! Codes are only sent once the code catalog is available; until then the
//! drain ticks do nothing. That covers powering on a TV whose catalog could
//! not be fetched while it was off.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::catalog::POWER_ON;
use super::Device;
use super::DeviceState;
use crate::bravia::DeviceClient;
use crate::bus::MqttClient;

const LAUNCH_PREFIX: &str = "LAUNCH-";

/// A parsed inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LAUNCH-<title>`: bring an application to the foreground
    Launch(String),
    /// `POWERON`: queue the wake code without consulting the catalog
    PowerOn,
    /// Any other name, resolved through the code catalog (uppercased)
    Code(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let prefix_len = LAUNCH_PREFIX.len();
        if text
            .get(..prefix_len)
            .is_some_and(|p| p.eq_ignore_ascii_case(LAUNCH_PREFIX))
        {
            return Command::Launch(text[prefix_len..].to_string());
        }

        let name = text.to_uppercase();
        if name == POWER_ON {
            Command::PowerOn
        } else {
            Command::Code(name)
        }
    }
}

/// The TV takes a while to settle on a sub-input, so switching to an HDMI
/// port optimistically publishes the label of its pair's first port.
fn input_shortcut(code_name: &str) -> Option<&'static str> {
    match code_name.to_uppercase().replace(' ', "").as_str() {
        "HDMI1" | "HDMI2" => Some("HDMI 1"),
        "HDMI3" | "HDMI4" => Some("HDMI 3"),
        _ => None,
    }
}

/// FIFO of IRCC values waiting to be sent, plus the drain timer
#[derive(Debug)]
pub struct CommandQueue {
    pending: VecDeque<String>,
    timer: Option<Interval>,
    period: Duration,
}

impl CommandQueue {
    pub fn new(period: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            timer: None,
            period,
        }
    }

    /// Append a code, starting a drain cycle unless one is running.
    /// The first tick comes one period after the start.
    pub fn push(&mut self, value: String) {
        self.pending.push_back(value);
        if self.timer.is_none() {
            let mut timer = tokio::time::interval_at(Instant::now() + self.period, self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.timer = Some(timer);
        }
    }

    pub fn pop(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Cancel the drain cycle
    pub fn stop(&mut self) {
        self.timer = None;
    }

    pub fn is_draining(&self) -> bool {
        self.timer.is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for the next drain tick; never completes while idle
    pub async fn tick(&mut self) {
        match &mut self.timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

impl<D: DeviceClient, B: MqttClient> Device<D, B> {
    /// Handle one inbound command. Never fails: unknown commands are logged
    /// and dropped.
    pub async fn submit(&mut self, text: &str) {
        debug!("[{}] Command {}", self.host, text);

        match Command::parse(text) {
            Command::Launch(title) => self.launch(&title).await,
            Command::PowerOn => {
                let wake = self.catalogs.wake_code();
                self.queue.push(wake.value);
            }
            Command::Code(name) => {
                let code = match self.catalogs.codes().and_then(|c| c.lookup(&name)) {
                    Some(code) => code.clone(),
                    None => {
                        warn!("[{}] Invalid command {}", self.host, name);
                        return;
                    }
                };

                if let Some(label) = input_shortcut(&code.name) {
                    self.apply(DeviceState::with_input(label)).await;
                }
                self.queue.push(code.value);
            }
        }
    }

    async fn launch(&mut self, title: &str) {
        let app = match self.catalogs.apps().and_then(|apps| apps.find(title)) {
            Some(app) => app.clone(),
            None => {
                debug!("[{}] No application titled {}", self.host, title);
                return;
            }
        };

        info!("[{}] Launching {} ({})", self.host, app.title, app.uri);
        if let Err(e) = self.client.activate_application(&app.uri).await {
            warn!("[{}] Failed to launch {}: {}", self.host, app.title, e);
        }
    }

    /// One drain tick: send the oldest queued code, and stop the drain
    /// cycle once the queue is empty.
    pub async fn drain_once(&mut self) {
        if self.catalogs.codes().is_none() {
            trace!("[{}] Waiting for the code catalog before sending", self.host);
            return;
        }

        if let Some(value) = self.queue.pop() {
            info!("[{}] Sending {}", self.host, value);
            if let Err(e) = self.client.send_control_code(&value).await {
                warn!("[{}] Failed to send {}: {}", self.host, value, e);
            }
        }

        if self.queue.is_empty() {
            self.queue.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bravia::protocol::WAKE_CODE_VALUE;
    use crate::bravia::Application;
    use crate::device::tests::sample_codes;
    use crate::device::tests::test_device;
    use crate::device::tests::TestDevice;

    async fn ready_device() -> (TestDevice, crate::bravia::MockBravia, crate::bus::MockMqttClient)
    {
        let (mut device, tv, bus) = test_device();
        tv.state().codes = Some(sample_codes());
        tv.state().apps = Some(vec![Application {
            title: "YouTube".to_string(),
            uri: "com.sony.dtv.youtube".to_string(),
            icon: None,
        }]);
        device.ensure_catalogs().await;
        (device, tv, bus)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("poweron"), Command::PowerOn);
        assert_eq!(Command::parse("PowerOn"), Command::PowerOn);
        assert_eq!(Command::parse("hdmi1"), Command::Code("HDMI1".to_string()));
        assert_eq!(
            Command::parse("LAUNCH-YouTube"),
            Command::Launch("YouTube".to_string())
        );
        assert_eq!(
            Command::parse("launch-netflix"),
            Command::Launch("netflix".to_string())
        );
    }

    #[test]
    fn test_input_shortcut_pairs() {
        assert_eq!(input_shortcut("Hdmi1"), Some("HDMI 1"));
        assert_eq!(input_shortcut("Hdmi2"), Some("HDMI 1"));
        assert_eq!(input_shortcut("HDMI 3"), Some("HDMI 3"));
        assert_eq!(input_shortcut("Hdmi4"), Some("HDMI 3"));
        assert_eq!(input_shortcut("VolumeUp"), None);
    }

    #[tokio::test]
    async fn test_poweron_without_catalog() {
        let (mut device, tv, _) = test_device();

        device.submit("POWERON").await;

        assert!(device.catalogs.codes().is_none());
        assert_eq!(device.queue.len(), 1);
        assert!(device.queue.is_draining());

        // Nothing is sent until the catalog shows up
        device.drain_once().await;
        assert!(tv.sent_values().is_empty());
        assert_eq!(device.queue.len(), 1);

        tv.state().codes = Some(sample_codes());
        device.ensure_catalogs().await;
        device.drain_once().await;
        assert_eq!(tv.sent_values(), vec![WAKE_CODE_VALUE]);
        assert!(!device.queue.is_draining());
    }

    #[tokio::test]
    async fn test_hdmi_pairs_share_label() {
        let (mut device, _, bus) = ready_device().await;

        device.submit("HDMI2").await;
        assert_eq!(device.state().input.as_deref(), Some("HDMI 1"));

        device.submit("HDMI1").await;
        assert_eq!(device.state().input.as_deref(), Some("HDMI 1"));

        device.submit("hdmi4").await;
        assert_eq!(device.state().input.as_deref(), Some("HDMI 3"));

        assert_eq!(
            bus.published_to("bravia/tv/status/input"),
            vec!["\"HDMI 1\"", "\"HDMI 1\"", "\"HDMI 3\""]
        );
        assert_eq!(device.queue.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_command_ignored() {
        let (mut device, tv, _) = ready_device().await;

        device.submit("NOTACOMMAND").await;

        assert!(device.queue.is_empty());
        assert!(!device.queue.is_draining());
        device.drain_once().await;
        assert!(tv.sent_values().is_empty());
    }

    #[tokio::test]
    async fn test_drain_sends_in_order_then_stops() {
        let (mut device, tv, _) = ready_device().await;

        device.submit("VolumeUp").await;
        device.submit("Mute").await;
        device.submit("PowerOff").await;
        assert!(device.queue.is_draining());

        device.drain_once().await;
        device.drain_once().await;
        assert!(device.queue.is_draining());
        device.drain_once().await;
        assert!(!device.queue.is_draining());

        assert_eq!(
            tv.sent_values(),
            vec![
                "AAAAAQAAAAEAAAASAw==",
                "AAAAAQAAAAEAAAAUAw==",
                "AAAAAQAAAAEAAAAvAw=="
            ]
        );
    }

    #[tokio::test]
    async fn test_launch_bypasses_queue() {
        let (mut device, tv, _) = ready_device().await;

        device.submit("LAUNCH-youtube").await;
        device.submit("LAUNCH-Unknown").await;

        assert_eq!(tv.state().launched, vec!["com.sony.dtv.youtube"]);
        assert!(device.queue.is_empty());
        assert!(tv.sent_values().is_empty());
    }
}
