//! Mass Orchestrator (spec §4.6): runs Discovery, matches and profiles
//! every device, and produces a priority-bucketed `TargetAssessment` list
//! for a whole LAN.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::instrument;
use upnp_recon_core::{Category, Device, DeviceIdentity};
use upnp_recon_discovery::DiscoveryOptions;
use upnp_recon_net::FetchOptions;
use upnp_recon_profiles::{match_device, ProfileStore, ScoredProfile};
use upnp_recon_profiling::{profile_devices, ActionInventory, ProfilingOptions, ScpdAnalysis};

/// Either the cheap "read service URNs only" pass or the full Profiling
/// Engine fan-out (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDepth {
    Shallow,
    Full,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub discovery: DiscoveryOptions,
    pub profiling: ProfilingOptions,
    pub scan_depth: ScanDepth,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            discovery: DiscoveryOptions::default(),
            profiling: ProfilingOptions::default(),
            scan_depth: ScanDepth::Shallow,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoriesSummary {
    pub security: usize,
    pub volume_control: usize,
    pub media_control: usize,
    pub configuration: usize,
    pub information: usize,
    pub other: usize,
}

impl From<upnp_recon_profiling::CategoryCounts> for CategoriesSummary {
    fn from(c: upnp_recon_profiling::CategoryCounts) -> Self {
        Self {
            security: c.security,
            volume_control: c.volume_control,
            media_control: c.media_control,
            configuration: c.configuration,
            information: c.information,
            other: c.other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetAssessment {
    pub device: Device,
    pub profile_match: Option<ScoredProfile>,
    pub primary_protocol: Option<upnp_recon_core::Protocol>,
    pub priority_score: u32,
    pub categories_summary: CategoriesSummary,
    pub security_findings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityBucket {
    High,
    Medium,
    Low,
    Unknown,
}

impl PriorityBucket {
    fn from_score(score: u32) -> Self {
        match score {
            70..=100 => PriorityBucket::High,
            30..=69 => PriorityBucket::Medium,
            1..=29 => PriorityBucket::Low,
            _ => PriorityBucket::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MassReport {
    pub high: Vec<TargetAssessment>,
    pub medium: Vec<TargetAssessment>,
    pub low: Vec<TargetAssessment>,
    pub unknown: Vec<TargetAssessment>,
}

fn has_service_containing(device: &Device, needle: &str) -> bool {
    device
        .services
        .iter()
        .any(|s| s.service_type.to_ascii_lowercase().contains(needle))
}

fn count_media_services(device: &Device) -> usize {
    const MEDIA_SERVICE_MARKERS: &[&str] = &["avtransport", "renderingcontrol", "contentdirectory"];
    device
        .services
        .iter()
        .filter(|s| {
            let lower = s.service_type.to_ascii_lowercase();
            MEDIA_SERVICE_MARKERS.iter().any(|m| lower.contains(m))
        })
        .count()
}

/// Priority score per spec §3: "sum of {Cast 15, WAM 12, ECP 10, UPnP
/// media services 2/service, security actions 10/action, admin interface
/// 8, exposed HTTP admin 15, media capability present 5}", capped at 100.
///
/// "Admin interface" and "exposed HTTP admin" aren't given crisp
/// detection rules in the spec; this implementation treats the presence
/// of a `DeviceProtection` service as an admin interface, and a router's
/// WAN-facing services (`Layer3Forwarding`/`WANIPConnection`) as an
/// exposed HTTP admin surface, since both are observable from the device
/// description alone without extra probing.
fn compute_priority_score(
    device: &Device,
    profile: Option<&ScoredProfile>,
    security_action_count: usize,
) -> u32 {
    let mut score = 0u32;

    if let Some(scored) = profile {
        if scored.profile.cast.is_some() {
            score += 15;
        }
        if scored.profile.wam.is_some() {
            score += 12;
        }
        if scored.profile.ecp.is_some() {
            score += 10;
        }
    }

    score += (count_media_services(device) * 2) as u32;
    score += (security_action_count * 10) as u32;

    if has_service_containing(device, "deviceprotection") {
        score += 8;
    }
    if has_service_containing(device, "layer3forwarding") || has_service_containing(device, "wanipconnection") {
        score += 15;
    }
    if count_media_services(device) > 0 {
        score += 5;
    }

    score.min(100)
}

fn primary_protocol_for(profile: Option<&ScoredProfile>) -> Option<upnp_recon_core::Protocol> {
    use upnp_recon_core::Protocol;
    let scored = profile?;
    if scored.profile.is_generic_fallback() {
        return Some(Protocol::Upnp);
    }
    Protocol::PRIORITY_ORDER.iter().copied().find(|p| match p {
        Protocol::Cast => scored.profile.cast.is_some(),
        Protocol::Wam => scored.profile.wam.is_some(),
        Protocol::Ecp => scored.profile.ecp.is_some(),
        Protocol::Heos => scored.profile.heos.is_some(),
        Protocol::MusicCast => scored.profile.musiccast.is_some(),
        Protocol::JsonRpc => scored.profile.jsonrpc.is_some(),
        Protocol::SoundTouch => scored.profile.soundtouch.is_some(),
        Protocol::Upnp => scored.profile.upnp.is_some(),
    })
}

fn security_findings_for(inventory: Option<&ActionInventory>) -> Vec<String> {
    let Some(inventory) = inventory else { return Vec::new() };
    let mut findings = Vec::new();
    for (service_name, actions) in inventory {
        for (action_name, action) in actions {
            if action.category == Category::Security {
                findings.push(format!("{service_name}.{action_name}"));
            }
        }
    }
    findings.sort();
    findings
}

/// Assesses a single device: matches it against the profile store and
/// optionally runs full profiling, producing its `TargetAssessment`.
fn assess(
    device: Device,
    store: &ProfileStore,
    inventory: Option<(ActionInventory, ScpdAnalysis)>,
) -> TargetAssessment {
    let ranked = match_device(&device, store);
    let best = ranked.into_iter().next();

    let (categories_summary, security_findings, security_action_count) = match &inventory {
        Some((inv, _)) => {
            let counts = upnp_recon_profiling::CategoryCounts::from_inventory(inv);
            let findings = security_findings_for(Some(inv));
            let sec_count = counts.security;
            (CategoriesSummary::from(counts), findings, sec_count)
        }
        None => (CategoriesSummary::default(), Vec::new(), 0),
    };

    let priority_score = compute_priority_score(&device, best.as_ref(), security_action_count);
    let primary_protocol = primary_protocol_for(best.as_ref());

    TargetAssessment {
        device,
        profile_match: best,
        primary_protocol,
        priority_score,
        categories_summary,
        security_findings,
    }
}

/// Assesses every device and buckets the results by priority, sorted
/// within each bucket by `priority_score` descending, ties broken by `ip`
/// (spec §5 "Mass Orchestrator output is sorted by priority_score
/// descending, with ties broken by ip").
fn bucket_report(
    devices: Vec<Device>,
    store: &ProfileStore,
    mut inventories: HashMap<DeviceIdentity, (ActionInventory, ScpdAnalysis)>,
) -> MassReport {
    let mut report = MassReport::default();
    for device in devices {
        let identity = device.identity();
        let inventory = inventories.remove(&identity);
        let assessment = assess(device, store, inventory);
        match PriorityBucket::from_score(assessment.priority_score) {
            PriorityBucket::High => report.high.push(assessment),
            PriorityBucket::Medium => report.medium.push(assessment),
            PriorityBucket::Low => report.low.push(assessment),
            PriorityBucket::Unknown => report.unknown.push(assessment),
        }
    }

    let by_score_then_ip = |a: &TargetAssessment, b: &TargetAssessment| {
        b.priority_score.cmp(&a.priority_score).then(a.device.ip.cmp(&b.device.ip))
    };
    report.high.sort_by(by_score_then_ip);
    report.medium.sort_by(by_score_then_ip);
    report.low.sort_by(by_score_then_ip);
    report.unknown.sort_by(by_score_then_ip);
    report
}

/// Runs Discovery (non-aggressive by default per spec §4.6), matches and
/// profiles every device, and buckets the result by priority.
#[instrument(skip_all)]
pub async fn run(opts: &OrchestratorOptions, store: &ProfileStore) -> anyhow::Result<MassReport> {
    let devices = upnp_recon_discovery::discover(&opts.discovery).await?;

    let client = upnp_recon_net::build_client(&FetchOptions {
        timeout: opts.profiling.timeout,
        ..Default::default()
    })?;

    let inventories = if opts.scan_depth == ScanDepth::Full {
        profile_devices(&devices, &client, &opts.profiling).await
    } else {
        HashMap::new()
    };

    Ok(bucket_report(devices, store, inventories))
}

/// Like [`run`], but a cancellation doesn't discard what's already been
/// discovered and profiled: it buckets and returns whatever Discovery and
/// Profiling had gathered up to that point instead of an error (spec §5
/// "partial results already collected must be returned to the caller",
/// testable property #11).
#[instrument(skip_all)]
pub async fn run_cancelable(
    opts: &OrchestratorOptions,
    store: &ProfileStore,
    token: &CancellationToken,
) -> anyhow::Result<MassReport> {
    let devices = upnp_recon_discovery::discover_cancelable(&opts.discovery, token).await?;

    let client = upnp_recon_net::build_client(&FetchOptions {
        timeout: opts.profiling.timeout,
        ..Default::default()
    })?;

    let inventories = if opts.scan_depth == ScanDepth::Full && !token.is_cancelled() {
        upnp_recon_profiling::profile_devices_cancelable(&devices, &client, &opts.profiling, token).await
    } else {
        HashMap::new()
    };

    Ok(bucket_report(devices, store, inventories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use upnp_recon_core::{DiscoveryMethod, Service};
    use url::Url;

    fn media_device() -> Device {
        Device {
            ip: Ipv4Addr::new(192, 0, 2, 5),
            port: 1400,
            udn: Some("uuid:1".to_string()),
            friendly_name: "Living Room".to_string(),
            manufacturer: "Sonos, Inc.".to_string(),
            model_name: "Port".to_string(),
            model_number: String::new(),
            device_type: "urn:schemas-upnp-org:device:ZonePlayer:1".to_string(),
            description_url: Url::parse("http://192.0.2.5:1400/desc.xml").unwrap(),
            server_header: String::new(),
            discovery_method: DiscoveryMethod::Ssdp,
            first_seen: 0,
            last_seen: 0,
            services: vec![
                Service {
                    service_type: "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
                    service_id: "AVTransport".to_string(),
                    control_url: Url::parse("http://192.0.2.5:1400/ctl").unwrap(),
                    event_sub_url: None,
                    scpd_url: Url::parse("http://192.0.2.5:1400/scpd").unwrap(),
                },
                Service {
                    service_type: "urn:schemas-upnp-org:service:RenderingControl:1".to_string(),
                    service_id: "RenderingControl".to_string(),
                    control_url: Url::parse("http://192.0.2.5:1400/ctl2").unwrap(),
                    event_sub_url: None,
                    scpd_url: Url::parse("http://192.0.2.5:1400/scpd2").unwrap(),
                },
            ],
        }
    }

    fn router_device() -> Device {
        let mut d = media_device();
        d.ip = Ipv4Addr::new(192, 0, 2, 1);
        d.udn = Some("uuid:router".to_string());
        d.device_type = "urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string();
        d.services = vec![Service {
            service_type: "urn:schemas-upnp-org:service:WANIPConnection:1".to_string(),
            service_id: "WANIPConn".to_string(),
            control_url: Url::parse("http://192.0.2.1:5000/ctl").unwrap(),
            event_sub_url: None,
            scpd_url: Url::parse("http://192.0.2.1:5000/scpd").unwrap(),
        }];
        d
    }

    #[test]
    fn priority_score_is_always_bounded() {
        let store = ProfileStore::new(Vec::new());
        let assessment = assess(media_device(), &store, None);
        assert!(assessment.priority_score <= 100);

        let assessment = assess(router_device(), &store, None);
        assert!(assessment.priority_score <= 100);
    }

    #[test]
    fn router_wan_services_count_toward_exposed_admin() {
        let store = ProfileStore::new(Vec::new());
        let assessment = assess(router_device(), &store, None);
        // WANIPConnection => exposed HTTP admin (15); no media services present.
        assert!(assessment.priority_score >= 15);
    }

    #[test]
    fn media_device_gets_media_capability_and_service_points() {
        let store = ProfileStore::new(Vec::new());
        let assessment = assess(media_device(), &store, None);
        // 2 media services * 2 = 4, plus media capability present = 5 => 9.
        assert_eq!(assessment.priority_score, 9);
    }

    #[test]
    fn bucket_thresholds_partition_the_score_range() {
        assert_eq!(PriorityBucket::from_score(0), PriorityBucket::Unknown);
        assert_eq!(PriorityBucket::from_score(10), PriorityBucket::Low);
        assert_eq!(PriorityBucket::from_score(50), PriorityBucket::Medium);
        assert_eq!(PriorityBucket::from_score(90), PriorityBucket::High);
    }

    #[test]
    fn bucket_is_sorted_by_priority_score_descending() {
        let store = ProfileStore::new(Vec::new());
        // router_device scores 15 (exposed HTTP admin), media_device scores 9
        // (media services + capability) -- both land in the Low bucket.
        let report = bucket_report(vec![media_device(), router_device()], &store, HashMap::new());
        assert_eq!(report.low.len(), 2);
        assert!(report.low[0].priority_score >= report.low[1].priority_score);
        assert_eq!(report.low[0].device.ip, router_device().ip);
    }

    #[test]
    fn bucket_ties_are_broken_by_ip_ascending() {
        let store = ProfileStore::new(Vec::new());
        let mut a = media_device();
        a.ip = Ipv4Addr::new(192, 0, 2, 9);
        a.udn = Some("uuid:a".to_string());
        let mut b = media_device();
        b.ip = Ipv4Addr::new(192, 0, 2, 2);
        b.udn = Some("uuid:b".to_string());

        let report = bucket_report(vec![a, b], &store, HashMap::new());
        assert_eq!(report.low.len(), 2);
        assert_eq!(report.low[0].device.ip, Ipv4Addr::new(192, 0, 2, 2));
        assert_eq!(report.low[1].device.ip, Ipv4Addr::new(192, 0, 2, 9));
    }
}
