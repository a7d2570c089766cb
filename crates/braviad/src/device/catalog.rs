//! Command vocabulary of a TV.
//!
//! Both catalogs are fetched lazily and at most once successfully per
//! instance. A failed fetch leaves the slot empty so the next poll tick
//! retries; a filled slot is never cleared again.

use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::debug;
use tracing::info;

use super::Device;
use super::DeviceState;
use crate::bravia::protocol::WAKE_CODE_NAME;
use crate::bravia::protocol::WAKE_CODE_VALUE;
use crate::bravia::Application;
use crate::bravia::DeviceClient;
use crate::bravia::RemoteCode;
use crate::bus::MqttClient;

/// Synthetic command name for powering the TV on
pub const POWER_ON: &str = "POWERON";

/// Uppercased command name -> remote control code
#[derive(Debug, Clone, Default)]
pub struct CodeCatalog {
    codes: HashMap<String, RemoteCode>,
}

impl CodeCatalog {
    pub fn from_codes(codes: &[RemoteCode]) -> Self {
        let mut map: HashMap<String, RemoteCode> = codes
            .iter()
            .map(|code| (code.name.to_uppercase(), code.clone()))
            .collect();

        // A TV in standby cannot report its wake code, so the alias always exists
        let wake = map
            .get(&WAKE_CODE_NAME.to_uppercase())
            .cloned()
            .unwrap_or_else(wake_code);
        map.insert(POWER_ON.to_string(), wake);

        Self { codes: map }
    }

    /// Look up a command name, ignoring case
    pub fn lookup(&self, name: &str) -> Option<&RemoteCode> {
        self.codes.get(&name.to_uppercase())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// The well-known wake code, used before the catalog is available
pub fn wake_code() -> RemoteCode {
    RemoteCode {
        name: WAKE_CODE_NAME.to_string(),
        value: WAKE_CODE_VALUE.to_string(),
    }
}

/// Application title -> launch descriptor
#[derive(Debug, Clone, Default)]
pub struct AppCatalog {
    apps: BTreeMap<String, Application>,
}

impl AppCatalog {
    pub fn from_apps(apps: &[Application]) -> Self {
        Self {
            apps: apps
                .iter()
                .map(|app| (app.title.clone(), app.clone()))
                .collect(),
        }
    }

    /// Find an application by title, ignoring case
    pub fn find(&self, title: &str) -> Option<&Application> {
        let title = title.to_lowercase();
        self.apps
            .iter()
            .find(|(t, _)| t.to_lowercase() == title)
            .map(|(_, app)| app)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.apps.len()
    }
}

/// Lazily filled catalog slots of one instance
#[derive(Debug, Default)]
pub struct Catalogs {
    codes: Option<CodeCatalog>,
    apps: Option<AppCatalog>,
}

impl Catalogs {
    pub fn codes(&self) -> Option<&CodeCatalog> {
        self.codes.as_ref()
    }

    pub fn apps(&self) -> Option<&AppCatalog> {
        self.apps.as_ref()
    }

    /// Wake code from the catalog, or the well-known one while it is missing
    pub fn wake_code(&self) -> RemoteCode {
        self.codes
            .as_ref()
            .and_then(|c| c.lookup(POWER_ON))
            .cloned()
            .unwrap_or_else(wake_code)
    }
}

impl<D: DeviceClient, B: MqttClient> Device<D, B> {
    /// Fetch whichever catalog is still missing.
    ///
    /// Idempotent once both catalogs are present. Each fetch is independent:
    /// a failed code fetch does not prevent the application fetch.
    pub async fn ensure_catalogs(&mut self) {
        let mut patch = DeviceState::default();

        if self.catalogs.codes.is_none() {
            match self.client.fetch_control_codes().await {
                Ok(codes) => {
                    let catalog = CodeCatalog::from_codes(&codes);
                    info!("[{}] Loaded {} remote control codes", self.host, codes.len());
                    debug!("[{}] Codes: {:?}", self.host, codes);
                    self.catalogs.codes = Some(catalog);
                    patch.codes = Some(codes);
                }
                Err(e) => self.facet_failed("codes", &e),
            }
        }

        if self.catalogs.apps.is_none() {
            match self.client.fetch_application_list().await {
                Ok(apps) => {
                    info!("[{}] Loaded {} applications", self.host, apps.len());
                    self.catalogs.apps = Some(AppCatalog::from_apps(&apps));
                    patch.apps = Some(apps);
                }
                Err(e) => self.facet_failed("apps", &e),
            }
        }

        if !patch.is_empty() {
            self.apply(patch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::test_device;
    use crate::device::tests::sample_codes;

    fn code(name: &str, value: &str) -> RemoteCode {
        RemoteCode {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_lookup_ignores_case() {
        let catalog = CodeCatalog::from_codes(&[code("VolumeUp", "AAAAAQAAAAEAAAASAw==")]);
        assert_eq!(
            catalog.lookup("volumeup").unwrap().value,
            "AAAAAQAAAAEAAAASAw=="
        );
        assert!(catalog.lookup("VOLUMEUP").is_some());
        assert!(catalog.lookup("NOTACOMMAND").is_none());
    }

    #[test]
    fn test_poweron_alias_prefers_reported_wake_code() {
        let catalog = CodeCatalog::from_codes(&[code("WakeUp", "reported")]);
        assert_eq!(catalog.lookup(POWER_ON).unwrap().value, "reported");

        let catalog = CodeCatalog::from_codes(&[code("Mute", "AAAAAQAAAAEAAAAUAw==")]);
        assert_eq!(catalog.lookup(POWER_ON).unwrap().value, WAKE_CODE_VALUE);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_find_app_ignores_case() {
        let catalog = AppCatalog::from_apps(&[Application {
            title: "YouTube".to_string(),
            uri: "com.sony.dtv.youtube".to_string(),
            icon: None,
        }]);
        assert_eq!(catalog.find("youtube").unwrap().uri, "com.sony.dtv.youtube");
        assert!(catalog.find("Netflix").is_none());
    }

    #[tokio::test]
    async fn test_catalog_retained_after_later_failure() {
        let (mut device, tv, _) = test_device();
        tv.state().codes = Some(sample_codes());

        device.ensure_catalogs().await;
        assert!(device.catalogs.codes().is_some());

        // Fetch now fails; the catalog stays and is not fetched again
        tv.state().codes = None;
        device.ensure_catalogs().await;
        device.ensure_catalogs().await;

        assert!(device.catalogs.codes().unwrap().lookup("HDMI1").is_some());
        let fetches = tv
            .state()
            .calls
            .iter()
            .filter(|c| **c == "getRemoteControllerInfo")
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_retried_next_time() {
        let (mut device, tv, _) = test_device();

        device.ensure_catalogs().await;
        assert!(device.catalogs.codes().is_none());
        assert!(device.catalogs.apps().is_none());

        tv.state().codes = Some(sample_codes());
        device.ensure_catalogs().await;
        assert!(device.catalogs.codes().is_some());
        assert!(device.catalogs.apps().is_none());
    }

    #[tokio::test]
    async fn test_app_fetch_independent_of_codes() {
        let (mut device, tv, bus) = test_device();
        tv.state().apps = Some(vec![Application {
            title: "Netflix".to_string(),
            uri: "com.sony.dtv.netflix".to_string(),
            icon: None,
        }]);

        device.ensure_catalogs().await;
        assert!(device.catalogs.codes().is_none());
        assert_eq!(device.catalogs.apps().unwrap().len(), 1);
        assert_eq!(bus.published_to("bravia/tv/status/apps").len(), 1);
        assert!(bus.published_to("bravia/tv/status/codes").is_empty());
    }

    #[tokio::test]
    async fn test_catalogs_published_once() {
        let (mut device, tv, bus) = test_device();
        tv.state().codes = Some(sample_codes());

        device.ensure_catalogs().await;
        device.ensure_catalogs().await;

        assert_eq!(bus.published_to("bravia/tv/status/codes").len(), 1);
    }
}
