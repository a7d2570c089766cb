//! Wire types of the Bravia REST API.
//!
//! JSON-RPC requests go to `http://<host>/sony/<service>`; remote control
//! codes are delivered through the IRCC SOAP endpoint instead.

use serde::Deserialize;
use serde::Serialize;

/// Header carrying the pre-shared key on every request
pub const PSK_HEADER: &str = "X-Auth-PSK";

pub const IRCC_SOAP_ACTION: &str = "\"urn:schemas-sony-com:service:IRCC:1#X_SendIRCC\"";

/// Name of the wake code in the TV's remote control catalog
pub const WAKE_CODE_NAME: &str = "WakeUp";

/// IRCC value of the power-on code. A TV in standby does not always report
/// its catalog, so this value is used until it does.
pub const WAKE_CODE_VALUE: &str = "AAAAAQAAAAEAAAAuAw==";

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: Vec<serde_json::Value>,
    pub id: u32,
    pub version: &'a str,
}

/// Response envelope: either `result` or `error: [code, message]`
#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<(i64, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PowerStatus {
    pub status: String,
}

impl PowerStatus {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// One entry of `getRemoteControllerInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCode {
    pub name: String,
    /// Base64 IRCC value sent to the TV
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub title: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Volume of one audio target ("speaker", "headphone", ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub target: String,
    pub volume: i32,
    #[serde(default)]
    pub mute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_volume: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_volume: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PlayingContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl PlayingContent {
    /// Human readable input label: the title up to the first `/`.
    ///
    /// External inputs report titles such as `HDMI 1/MHL`.
    pub fn input_label(&self) -> &str {
        match self.title.split_once('/') {
            Some((label, _)) => label,
            None => &self.title,
        }
    }
}

/// SOAP body delivering one IRCC code
pub(crate) fn ircc_envelope(value: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:X_SendIRCC xmlns:u="urn:schemas-sony-com:service:IRCC:1">"#,
            "<IRCCCode>{}</IRCCCode>",
            "</u:X_SendIRCC></s:Body></s:Envelope>"
        ),
        value
    )
}

#[derive(Debug, thiserror::Error)]
pub enum BraviaError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} failed with error {code}: {message}")]
    Api {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("{0} returned no result")]
    EmptyResult(&'static str),
}

#[cfg(test)]
mod tests {
    use serde::de::IgnoredAny;

    use super::*;

    #[test]
    fn test_input_label_strips_suffix() {
        let content = PlayingContent {
            title: "HDMI 1/abc".to_string(),
            ..Default::default()
        };
        assert_eq!(content.input_label(), "HDMI 1");

        let content = PlayingContent {
            title: "Netflix".to_string(),
            ..Default::default()
        };
        assert_eq!(content.input_label(), "Netflix");
    }

    #[test]
    fn test_parse_power_response() {
        let body = r#"{"result":[{"status":"active"}],"id":1}"#;
        let resp: RpcResponse<Vec<PowerStatus>> = serde_json::from_str(body).unwrap();
        assert!(resp.result.unwrap()[0].is_active());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"error":[7,"Illegal State"],"id":1}"#;
        let resp: RpcResponse<Vec<PlayingContent>> = serde_json::from_str(body).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error, Some((7, "Illegal State".to_string())));
    }

    #[test]
    fn test_parse_remote_controller_info() {
        let body = r#"{"result":[
            {"bundled":true,"type":"IR_REMOTE_BUNDLE_TYPE_AEP_N"},
            [{"name":"PowerOff","value":"AAAAAQAAAAEAAAAvAw=="},
             {"name":"Hdmi1","value":"AAAAAgAAABoAAABaAw=="}]
        ],"id":1}"#;
        let resp: RpcResponse<(IgnoredAny, Vec<RemoteCode>)> = serde_json::from_str(body).unwrap();
        let (_, codes) = resp.result.unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[1].name, "Hdmi1");
    }

    #[test]
    fn test_parse_volume_information() {
        let body = r#"{"result":[[
            {"target":"speaker","volume":12,"mute":false,"maxVolume":100,"minVolume":0}
        ]],"id":1}"#;
        let resp: RpcResponse<Vec<Vec<VolumeInfo>>> = serde_json::from_str(body).unwrap();
        let volume = &resp.result.unwrap()[0][0];
        assert_eq!(volume.target, "speaker");
        assert_eq!(volume.volume, 12);
        assert_eq!(volume.max_volume, Some(100));
    }

    #[test]
    fn test_ircc_envelope_carries_code() {
        let body = ircc_envelope(WAKE_CODE_VALUE);
        assert!(body.contains("<IRCCCode>AAAAAQAAAAEAAAAuAw==</IRCCCode>"));
        assert!(body.starts_with("<?xml"));
    }
}
