use upnp_recon_core::Device;

use crate::store::ProfileStore;
use crate::types::{DeviceProfile, MatchCriteria};

const WEIGHT_MANUFACTURER: u32 = 4;
const WEIGHT_MODEL: u32 = 3;
const WEIGHT_DEVICE_TYPE: u32 = 2;
const WEIGHT_SERVER: u32 = 1;

/// One scored candidate from `match_device` (spec §4.5). `longest_match`
/// is the length of the single longest matching substring, used only to
/// break ties between profiles with equal `score`.
#[derive(Debug, Clone)]
pub struct ScoredProfile {
    pub profile: DeviceProfile,
    pub score: u32,
    longest_match: usize,
}

fn best_substring_match<'a>(haystack: &str, needles: &'a [String]) -> Option<&'a str> {
    let haystack = haystack.to_ascii_lowercase();
    needles
        .iter()
        .filter(|n| !n.is_empty() && haystack.contains(&n.to_ascii_lowercase()))
        .max_by_key(|n| n.len())
        .map(|s| s.as_str())
}

fn score_against(criteria: &MatchCriteria, device: &Device) -> (u32, usize) {
    let mut score = 0;
    let mut longest = 0;

    let mut apply = |field: &str, needles: &[String], weight: u32| {
        if let Some(m) = best_substring_match(field, needles) {
            score += weight;
            longest = longest.max(m.len());
        }
    };

    apply(&device.manufacturer, &criteria.manufacturer, WEIGHT_MANUFACTURER);
    apply(&device.model_name, &criteria.model_name, WEIGHT_MODEL);
    apply(&device.device_type, &criteria.device_type, WEIGHT_DEVICE_TYPE);
    apply(&device.server_header, &criteria.server_header, WEIGHT_SERVER);

    (score, longest)
}

fn exposes_media_renderer(device: &Device) -> bool {
    device.device_type.to_ascii_lowercase().contains("mediarenderer")
        || device
            .services
            .iter()
            .any(|s| s.service_type.to_ascii_lowercase().contains("avtransport"))
}

/// Scores every profile in `store` against `device` and returns them
/// ranked highest score first, ties broken by the longer matching
/// substring (spec §4.5, §3). A profile with zero score is excluded
/// unless it is the generic fallback and the device exposes a
/// MediaRenderer service.
pub fn match_device(device: &Device, store: &ProfileStore) -> Vec<ScoredProfile> {
    let mut candidates: Vec<ScoredProfile> = store
        .profiles()
        .iter()
        .filter_map(|profile| {
            let (score, longest_match) = score_against(&profile.match_criteria, device);
            (score > 0).then(|| ScoredProfile {
                profile: profile.clone(),
                score,
                longest_match,
            })
        })
        .collect();

    if candidates.is_empty() && exposes_media_renderer(device) {
        candidates.push(ScoredProfile {
            profile: DeviceProfile::generic_media_renderer_fallback(),
            score: 1,
            longest_match: 0,
        });
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(b.longest_match.cmp(&a.longest_match)));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use upnp_recon_core::DiscoveryMethod;
    use url::Url;

    fn sonos_device() -> Device {
        Device {
            ip: Ipv4Addr::new(192, 0, 2, 5),
            port: 1400,
            udn: None,
            friendly_name: "Living Room".to_string(),
            manufacturer: "Sonos, Inc.".to_string(),
            model_name: "Sonos Port".to_string(),
            model_number: String::new(),
            device_type: "urn:schemas-upnp-org:device:ZonePlayer:1".to_string(),
            description_url: Url::parse("http://192.0.2.5:1400/desc.xml").unwrap(),
            server_header: String::new(),
            discovery_method: DiscoveryMethod::Ssdp,
            first_seen: 0,
            last_seen: 0,
            services: Vec::new(),
        }
    }

    fn sonos_profile() -> DeviceProfile {
        DeviceProfile {
            name: "sonos".to_string(),
            match_criteria: MatchCriteria {
                manufacturer: vec!["Sonos".to_string()],
                device_type: vec!["ZonePlayer".to_string()],
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
            notes: None,
        }
    }

    #[test]
    fn sonos_profile_beats_generic_fallback() {
        let mut device = sonos_device();
        device.device_type = "urn:schemas-upnp-org:device:ZonePlayer:1".to_string();
        let store = ProfileStore::new(vec![sonos_profile()]);
        let ranked = match_device(&device, &store);
        assert_eq!(ranked[0].profile.name, "sonos");
        // manufacturer(4) + device_type(2) = 6, strictly above the fallback's 1.
        assert_eq!(ranked[0].score, 6);
        assert!(ranked[0].score > 1);
    }

    #[test]
    fn generic_fallback_applies_only_to_media_renderers() {
        let mut device = sonos_device();
        device.manufacturer = "Unknown Corp".to_string();
        device.device_type = "urn:schemas-upnp-org:device:MediaRenderer:1".to_string();
        let store = ProfileStore::new(vec![sonos_profile()]);
        let ranked = match_device(&device, &store);
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].profile.is_generic_fallback());
        assert_eq!(ranked[0].score, 1);
    }

    #[test]
    fn no_match_and_not_media_renderer_yields_empty() {
        let mut device = sonos_device();
        device.manufacturer = "Unknown Corp".to_string();
        device.device_type = "urn:schemas-upnp-org:device:Basic:1".to_string();
        let store = ProfileStore::new(vec![sonos_profile()]);
        assert!(match_device(&device, &store).is_empty());
    }

    #[test]
    fn ties_broken_by_longer_match_string() {
        let mut device = sonos_device();
        device.manufacturer = "Sonos, Inc.".to_string();
        device.device_type = "urn:schemas-upnp-org:device:Other:1".to_string();

        let narrow = DeviceProfile {
            name: "narrow".to_string(),
            match_criteria: MatchCriteria {
                manufacturer: vec!["Son".to_string()],
                ..Default::default()
            },
            ..sonos_profile()
        };
        let wide = DeviceProfile {
            name: "wide".to_string(),
            match_criteria: MatchCriteria {
                manufacturer: vec!["Sonos, Inc.".to_string()],
                ..Default::default()
            },
            ..sonos_profile()
        };

        let store = ProfileStore::new(vec![narrow, wide]);
        let ranked = match_device(&device, &store);
        assert_eq!(ranked[0].profile.name, "wide");
    }
}
