use std::collections::BTreeMap;

use serde::Serialize;

use crate::bravia::Application;
use crate::bravia::RemoteCode;
use crate::bravia::VolumeInfo;

/// Label published as `input` while the TV is off
pub const INPUT_OFF: &str = "Off";

/// Published state of one TV.
///
/// The same type doubles as a merge patch: a patch only carries the facets a
/// poller wrote, and [`DeviceState::merge`] overlays them without touching
/// the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,

    /// Volume per audio target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<BTreeMap<String, VolumeInfo>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub codes: Option<Vec<RemoteCode>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps: Option<Vec<Application>>,
}

impl DeviceState {
    pub fn with_power(power: bool) -> Self {
        Self {
            power: Some(power),
            ..Default::default()
        }
    }

    pub fn with_input(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Default::default()
        }
    }

    pub fn with_volume(volume: BTreeMap<String, VolumeInfo>) -> Self {
        Self {
            volume: Some(volume),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the TV was on at the last successful power poll
    pub fn is_on(&self) -> bool {
        self.power == Some(true)
    }

    /// Overlay every facet set in `patch`
    pub fn merge(&mut self, patch: DeviceState) {
        if patch.power.is_some() {
            self.power = patch.power;
        }
        if patch.volume.is_some() {
            self.volume = patch.volume;
        }
        if patch.input.is_some() {
            self.input = patch.input;
        }
        if patch.codes.is_some() {
            self.codes = patch.codes;
        }
        if patch.apps.is_some() {
            self.apps = patch.apps;
        }
    }

    /// The facets set in this state as `(field, JSON value)` pairs, the unit
    /// of publishing.
    pub fn fields(&self) -> Vec<(String, serde_json::Value)> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => Vec::new(),
        }
    }
}
