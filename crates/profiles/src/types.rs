use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Case-insensitive substring criteria a profile is matched against (spec
/// §6 profile file format).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchCriteria {
    #[serde(default)]
    pub manufacturer: Vec<String>,
    #[serde(default, rename = "modelName")]
    pub model_name: Vec<String>,
    #[serde(default, rename = "deviceType")]
    pub device_type: Vec<String>,
    #[serde(default)]
    pub server_header: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpnpEndpoint {
    pub service_type: String,
    pub control_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcpEndpoint {
    pub port: u16,
    pub launch_url: String,
    pub input_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WamCommand {
    pub cmd: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WamEndpoint {
    pub port: u16,
    pub set_url_playback: WamCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastEndpoint {
    pub port: u16,
    pub device_desc_url: String,
    pub media_namespace: String,
    pub launch_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeosEndpoint {
    pub port: u16,
    #[serde(default)]
    pub commands: HashMap<String, String>,
    pub endpoint: String,
}

/// A catch-all endpoint block for the less heavily structured vendor
/// protocols (MusicCast, JSON-RPC, SoundTouch) that share little beyond a
/// port and a handful of endpoint templates (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericEndpoint {
    pub port: Option<u16>,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// A vendor profile loaded from an external profile file (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(rename = "match")]
    pub match_criteria: MatchCriteria,
    #[serde(default)]
    pub upnp: Option<HashMap<String, UpnpEndpoint>>,
    #[serde(default)]
    pub ecp: Option<EcpEndpoint>,
    #[serde(default)]
    pub wam: Option<WamEndpoint>,
    #[serde(default)]
    pub cast: Option<CastEndpoint>,
    #[serde(default)]
    pub heos: Option<HeosEndpoint>,
    #[serde(default)]
    pub musiccast: Option<GenericEndpoint>,
    #[serde(default)]
    pub jsonrpc: Option<GenericEndpoint>,
    #[serde(default)]
    pub soundtouch: Option<GenericEndpoint>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DeviceProfile {
    /// The generic MediaRenderer fallback is a built-in, not a file on
    /// disk (spec §3: "matches any device of type MediaRenderer with
    /// score 1").
    pub fn generic_media_renderer_fallback() -> Self {
        Self {
            name: "generic-media-renderer".to_string(),
            match_criteria: MatchCriteria {
                device_type: vec!["MediaRenderer".to_string()],
                ..Default::default()
            },
            upnp: None,
            ecp: None,
            wam: None,
            cast: None,
            heos: None,
            musiccast: None,
            jsonrpc: None,
            soundtouch: None,
            notes: Some("built-in fallback, no vendor-specific endpoints".to_string()),
        }
    }

    pub fn is_generic_fallback(&self) -> bool {
        self.name == "generic-media-renderer"
    }
}
