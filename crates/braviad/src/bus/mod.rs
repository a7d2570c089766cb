//! MQTT side of the bridge.
//!
//! A device instance lives under `<root>/<host>`. State fields are published
//! retained to `<root>/<host>/status/<field>`, commands arrive on
//! `<root>/<host>/set/#`.

mod client;

#[cfg(test)]
pub use client::MockMqttClient;
pub use client::MqttClient;
pub use client::MqttMessage;
pub use client::RumqttcClient;

/// Topic layout of one device instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(root: &str, host: &str) -> Self {
        Self {
            base: format!("{}/{}", root.trim_end_matches('/'), host),
        }
    }

    /// Topic a single state field is published to
    pub fn status(&self, field: &str) -> String {
        format!("{}/status/{}", self.base, field)
    }

    /// Wildcard subscription for inbound commands
    pub fn commands(&self) -> String {
        format!("{}/set/#", self.base)
    }

    /// Whether `topic` is one of this instance's command topics
    pub fn is_command(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.base.as_str())
            .is_some_and(|rest| rest == "/set" || rest.starts_with("/set/"))
    }
}
