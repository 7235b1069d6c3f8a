use serde::{Deserialize, Serialize};

/// The non-UPnP sibling protocols a `DeviceProfile` may describe (spec §3,
/// §4.4). Ordering here doubles as adapter-selection priority: `Cast` is
/// tried before `Wam`, and so on, ending with `Upnp` and the generic
/// fallback (spec §9 open question 1 — this order is authoritative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Protocol {
    Cast,
    Wam,
    Ecp,
    Heos,
    MusicCast,
    JsonRpc,
    SoundTouch,
    Upnp,
}

impl Protocol {
    /// All protocols in adapter-selection priority order.
    pub const PRIORITY_ORDER: [Protocol; 8] = [
        Protocol::Cast,
        Protocol::Wam,
        Protocol::Ecp,
        Protocol::Heos,
        Protocol::MusicCast,
        Protocol::JsonRpc,
        Protocol::SoundTouch,
        Protocol::Upnp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Cast => "cast",
            Protocol::Wam => "wam",
            Protocol::Ecp => "ecp",
            Protocol::Heos => "heos",
            Protocol::MusicCast => "musiccast",
            Protocol::JsonRpc => "jsonrpc",
            Protocol::SoundTouch => "soundtouch",
            Protocol::Upnp => "upnp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "cast" => Protocol::Cast,
            "wam" => Protocol::Wam,
            "ecp" => Protocol::Ecp,
            "heos" => Protocol::Heos,
            "musiccast" => Protocol::MusicCast,
            "jsonrpc" => Protocol::JsonRpc,
            "soundtouch" => Protocol::SoundTouch,
            "upnp" => Protocol::Upnp,
            _ => return Err(()),
        })
    }
}
