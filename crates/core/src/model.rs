use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use url::Url;

/// How a `Device` record was first produced. §3: the SSDP phase always wins
/// ties during the dedup merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMethod {
    Ssdp,
    PortScan,
}

impl DiscoveryMethod {
    /// SSDP outranks a port-scan discovery when merging two records for the
    /// same identity (spec §3, §4.1 step 4).
    pub fn outranks(self, other: DiscoveryMethod) -> bool {
        matches!(
            (self, other),
            (DiscoveryMethod::Ssdp, DiscoveryMethod::PortScan)
        )
    }
}

/// The key used to merge two `Device` records that describe the same
/// physical device (spec §3, §9 open question 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceIdentity {
    Udn(String),
    IpPort(Ipv4Addr, u16),
    Triple(String, String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub udn: Option<String>,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub device_type: String,
    pub description_url: Url,
    pub server_header: String,
    pub discovery_method: DiscoveryMethod,
    pub first_seen: u64,
    pub last_seen: u64,
    pub services: Vec<Service>,
}

impl Device {
    /// Identity per spec §3: UDN, else `(ip, port)`, else the
    /// `(manufacturer, model, friendlyName)` triple. The triple is
    /// deliberately last-resort: it collides across identical speakers in
    /// different rooms (spec §9 open question 3).
    pub fn identity(&self) -> DeviceIdentity {
        if let Some(udn) = self.udn.as_ref().filter(|u| !u.is_empty()) {
            return DeviceIdentity::Udn(udn.clone());
        }
        if self.ip != Ipv4Addr::UNSPECIFIED {
            return DeviceIdentity::IpPort(self.ip, self.port);
        }
        DeviceIdentity::Triple(
            self.manufacturer.clone(),
            self.model_name.clone(),
            self.friendly_name.clone(),
        )
    }

    /// Merge `other` into `self` per spec §3/§4.1 step 4.
    ///
    /// When the two records come from different discovery methods, the
    /// SSDP record wins outright and only picks up fields it lacks from the
    /// port-scan record (§4.1: "keep the SSDP record and copy any fields the
    /// port-scan record had and the SSDP record lacked"). When they share a
    /// discovery method, `other` is treated as the newer observation and
    /// later data wins per field (§3).
    pub fn merge_from(&mut self, other: Device) {
        match (self.discovery_method, other.discovery_method) {
            (DiscoveryMethod::PortScan, DiscoveryMethod::Ssdp) => {
                let portscan_services = std::mem::take(&mut self.services);
                let first_seen = self.first_seen.min(other.first_seen);
                let last_seen = self.last_seen.max(other.last_seen);
                *self = other;
                if self.services.is_empty() {
                    self.services = portscan_services;
                }
                self.first_seen = first_seen;
                self.last_seen = last_seen;
            }
            (DiscoveryMethod::Ssdp, DiscoveryMethod::PortScan) => {
                macro_rules! fill_if_empty {
                    ($field:ident) => {
                        if self.$field.is_empty() {
                            self.$field = other.$field.clone();
                        }
                    };
                }
                fill_if_empty!(friendly_name);
                fill_if_empty!(manufacturer);
                fill_if_empty!(model_name);
                fill_if_empty!(model_number);
                fill_if_empty!(device_type);
                fill_if_empty!(server_header);
                if self.udn.is_none() {
                    self.udn = other.udn.clone();
                }
                if self.services.is_empty() {
                    self.services = other.services.clone();
                }
                self.last_seen = self.last_seen.max(other.last_seen);
                self.first_seen = self.first_seen.min(other.first_seen);
            }
            _ => {
                macro_rules! overwrite_if_present {
                    ($field:ident) => {
                        if !other.$field.is_empty() {
                            self.$field = other.$field.clone();
                        }
                    };
                }
                overwrite_if_present!(friendly_name);
                overwrite_if_present!(manufacturer);
                overwrite_if_present!(model_name);
                overwrite_if_present!(model_number);
                overwrite_if_present!(device_type);
                overwrite_if_present!(server_header);
                if other.udn.is_some() {
                    self.udn = other.udn.clone();
                }
                if !other.services.is_empty() {
                    self.services = other.services.clone();
                }
                self.description_url = other.description_url.clone();
                self.last_seen = self.last_seen.max(other.last_seen);
                self.first_seen = self.first_seen.min(other.first_seen);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_type: String,
    pub service_id: String,
    /// Always absolute after normalization (spec §3 invariant).
    pub control_url: Url,
    pub event_sub_url: Option<Url>,
    /// Always absolute after normalization (spec §3 invariant).
    pub scpd_url: Url,
}

impl Service {
    /// The last URN token of `service_type`, lowercased, digits stripped
    /// (spec §4.3): `urn:schemas-upnp-org:service:AVTransport:1` -> `avtransport`.
    pub fn short_name(&self) -> String {
        let token = self
            .service_type
            .rsplit(':')
            .nth(1)
            .unwrap_or(&self.service_type);
        token
            .chars()
            .filter(|c| !c.is_ascii_digit())
            .flat_map(|c| c.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Range {
    pub min: String,
    pub max: String,
    pub step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionArgument {
    pub name: String,
    pub direction: Direction,
    pub data_type: String,
    pub related_state_variable: Option<String>,
    pub allowed_values: Option<Vec<String>>,
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    pub send_events: bool,
    pub default_value: Option<String>,
    pub allowed_values: Option<Vec<String>>,
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    Easy,
    Medium,
    Complex,
}

impl Complexity {
    /// Spec §3: easy if <=1 in and <=1 out; complex if >=3 in or >=4 out;
    /// else medium.
    pub fn classify(args_in: usize, args_out: usize) -> Self {
        if args_in >= 3 || args_out >= 4 {
            Complexity::Complex
        } else if args_in <= 1 && args_out <= 1 {
            Complexity::Easy
        } else {
            Complexity::Medium
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Security,
    VolumeControl,
    MediaControl,
    Configuration,
    Information,
    Other,
}

impl Category {
    /// Keyword match against the action name, case-insensitive, in the
    /// priority order from spec §3: security, volume, media, configuration,
    /// information, else other.
    pub fn classify(action_name: &str) -> Self {
        let lower = action_name.to_ascii_lowercase();
        const SECURITY: &[&str] = &["password", "account", "security", "protect"];
        const VOLUME: &[&str] = &["volume", "mute", "bass", "treble", "loudness"];
        const MEDIA: &[&str] = &[
            "play", "pause", "stop", "seek", "next", "previous", "uri", "transport", "queue",
        ];
        const CONFIG: &[&str] = &["set", "configure", "edit", "update", "write"];
        const INFO: &[&str] = &["get", "query", "list", "browse", "read"];

        let matches_any = |kws: &[&str]| kws.iter().any(|k| lower.contains(k));

        if matches_any(SECURITY) {
            Category::Security
        } else if matches_any(VOLUME) {
            Category::VolumeControl
        } else if matches_any(MEDIA) {
            Category::MediaControl
        } else if matches_any(CONFIG) {
            Category::Configuration
        } else if matches_any(INFO) {
            Category::Information
        } else {
            Category::Other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapAction {
    pub name: String,
    pub arguments_in: Vec<ActionArgument>,
    pub arguments_out: Vec<ActionArgument>,
    pub complexity: Complexity,
    pub category: Category,
}

impl SoapAction {
    pub fn new(name: String, arguments_in: Vec<ActionArgument>, arguments_out: Vec<ActionArgument>) -> Self {
        let complexity = Complexity::classify(arguments_in.len(), arguments_out.len());
        let category = Category::classify(&name);
        Self {
            name,
            arguments_in,
            arguments_out,
            complexity,
            category,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScpdDocument {
    pub actions: HashMap<String, SoapAction>,
    pub state_variables: HashMap<String, StateVariable>,
    pub parse_errors: Vec<String>,
}
