use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::de::IgnoredAny;
use tracing::debug;
use tracing::trace;

use super::protocol::ircc_envelope;
use super::protocol::Application;
use super::protocol::BraviaError;
use super::protocol::PlayingContent;
use super::protocol::PowerStatus;
use super::protocol::RemoteCode;
use super::protocol::RpcRequest;
use super::protocol::RpcResponse;
use super::protocol::VolumeInfo;
use super::protocol::IRCC_SOAP_ACTION;
use super::protocol::PSK_HEADER;

/// Operations the synchronizer needs from a TV
///
/// Every fetch fails on network or protocol errors. Sends are fire-and-forget
/// for the caller: their result is only logged.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn fetch_power_status(&self) -> Result<PowerStatus, BraviaError>;

    async fn fetch_control_codes(&self) -> Result<Vec<RemoteCode>, BraviaError>;

    async fn fetch_application_list(&self) -> Result<Vec<Application>, BraviaError>;

    async fn fetch_volume_info(&self) -> Result<Vec<VolumeInfo>, BraviaError>;

    async fn fetch_playing_content(&self) -> Result<PlayingContent, BraviaError>;

    /// Send one IRCC code
    async fn send_control_code(&self, value: &str) -> Result<(), BraviaError>;

    /// Bring the application behind `uri` to the foreground
    async fn activate_application(&self, uri: &str) -> Result<(), BraviaError>;
}

/// HTTP client for one Bravia TV
pub struct BraviaClient {
    http: reqwest::Client,
    base_url: String,
    psk: String,
}

impl BraviaClient {
    pub fn new(host: &str, psk: &str, timeout: Duration) -> Result<Self, BraviaError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{}/sony", host),
            psk: psk.to_string(),
        })
    }

    /// Invoke a JSON-RPC method and unwrap the response envelope
    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, BraviaError> {
        let url = format!("{}/{}", self.base_url, service);
        trace!("POST {} {}", url, method);

        let request = RpcRequest {
            method,
            params,
            id: 1,
            version: "1.0",
        };
        let response: RpcResponse<T> = self
            .http
            .post(&url)
            .header(PSK_HEADER, &self.psk)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        match response {
            RpcResponse {
                error: Some((code, message)),
                ..
            } => Err(BraviaError::Api {
                method,
                code,
                message,
            }),
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => Err(BraviaError::EmptyResult(method)),
        }
    }

    /// Most methods wrap their payload in a one element array
    async fn call_first<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &'static str,
    ) -> Result<T, BraviaError> {
        let result: Vec<T> = self.call(service, method, Vec::new()).await?;
        result
            .into_iter()
            .next()
            .ok_or(BraviaError::EmptyResult(method))
    }
}

#[async_trait]
impl DeviceClient for BraviaClient {
    async fn fetch_power_status(&self) -> Result<PowerStatus, BraviaError> {
        self.call_first("system", "getPowerStatus").await
    }

    async fn fetch_control_codes(&self) -> Result<Vec<RemoteCode>, BraviaError> {
        let (_, codes): (IgnoredAny, Vec<RemoteCode>) = self
            .call("system", "getRemoteControllerInfo", Vec::new())
            .await?;
        Ok(codes)
    }

    async fn fetch_application_list(&self) -> Result<Vec<Application>, BraviaError> {
        self.call_first("appControl", "getApplicationList").await
    }

    async fn fetch_volume_info(&self) -> Result<Vec<VolumeInfo>, BraviaError> {
        self.call_first("audio", "getVolumeInformation").await
    }

    async fn fetch_playing_content(&self) -> Result<PlayingContent, BraviaError> {
        self.call_first("avContent", "getPlayingContentInfo").await
    }

    async fn send_control_code(&self, value: &str) -> Result<(), BraviaError> {
        let url = format!("{}/IRCC", self.base_url);
        debug!("POST {} IRCC {}", url, value);

        self.http
            .post(&url)
            .header(PSK_HEADER, &self.psk)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=UTF-8")
            .header("SOAPACTION", IRCC_SOAP_ACTION)
            .body(ircc_envelope(value))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn activate_application(&self, uri: &str) -> Result<(), BraviaError> {
        let _: IgnoredAny = self
            .call(
                "appControl",
                "setActiveApp",
                vec![serde_json::json!({ "uri": uri })],
            )
            .await?;
        Ok(())
    }
}

/// Scripted TV for tests. A facet set to `None` fails when fetched.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockState {
    pub power: Option<PowerStatus>,
    pub codes: Option<Vec<RemoteCode>>,
    pub apps: Option<Vec<Application>>,
    pub volume: Option<Vec<VolumeInfo>>,
    pub playing: Option<PlayingContent>,
    /// Names of the fetch methods called, in order
    pub calls: Vec<&'static str>,
    /// IRCC values sent, with the (tokio) time they were sent at
    pub sent: Vec<(tokio::time::Instant, String)>,
    pub launched: Vec<String>,
}

#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockBravia {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
impl MockBravia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn sent_values(&self) -> Vec<String> {
        self.state().sent.iter().map(|(_, v)| v.clone()).collect()
    }

    fn fetch<T: Clone>(
        &self,
        method: &'static str,
        pick: impl FnOnce(&MockState) -> Option<T>,
    ) -> Result<T, BraviaError> {
        let mut state = self.state();
        state.calls.push(method);
        pick(&state).ok_or(BraviaError::EmptyResult(method))
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceClient for MockBravia {
    async fn fetch_power_status(&self) -> Result<PowerStatus, BraviaError> {
        self.fetch("getPowerStatus", |s| s.power.clone())
    }

    async fn fetch_control_codes(&self) -> Result<Vec<RemoteCode>, BraviaError> {
        self.fetch("getRemoteControllerInfo", |s| s.codes.clone())
    }

    async fn fetch_application_list(&self) -> Result<Vec<Application>, BraviaError> {
        self.fetch("getApplicationList", |s| s.apps.clone())
    }

    async fn fetch_volume_info(&self) -> Result<Vec<VolumeInfo>, BraviaError> {
        self.fetch("getVolumeInformation", |s| s.volume.clone())
    }

    async fn fetch_playing_content(&self) -> Result<PlayingContent, BraviaError> {
        self.fetch("getPlayingContentInfo", |s| s.playing.clone())
    }

    async fn send_control_code(&self, value: &str) -> Result<(), BraviaError> {
        self.state()
            .sent
            .push((tokio::time::Instant::now(), value.to_string()));
        Ok(())
    }

    async fn activate_application(&self, uri: &str) -> Result<(), BraviaError> {
        self.state().launched.push(uri.to_string());
        Ok(())
    }
}
