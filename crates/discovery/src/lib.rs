//! Discovery Engine (spec §4.1): SSDP sweep, optional port sweep, device
//! description fetch, and the two-level dedup pass that turns ~100 raw
//! SSDP announcements into a handful of unique devices.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use ipnetwork::Ipv4Network;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use upnp_recon_core::{Device, DeviceIdentity, DiscoveryMethod};
use upnp_recon_net::{FetchOptions, SsdpResponse};
use url::Url;

const DEFAULT_PORTS: &[u16] = &[80, 443, 1400, 7000, 8008, 8060, 8443, 9080, 49200];
const DESCRIPTION_PATHS: &[&str] = &["/xml/device_description.xml", "/description.xml"];

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Network to port-sweep; auto-detected from the default interface when
    /// `None` and `aggressive` is set (spec §4.1 inputs).
    pub cidr: Option<Ipv4Network>,
    pub timeout: Duration,
    pub aggressive: bool,
    pub ports: Vec<u16>,
    pub port_sweep_concurrency: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            cidr: None,
            timeout: Duration::from_secs(5),
            aggressive: false,
            ports: DEFAULT_PORTS.to_vec(),
            port_sweep_concurrency: 256,
        }
    }
}

/// Finds the IPv4 network of the host's default interface, for the
/// auto-detect path of spec §4.1's CIDR input.
pub fn default_interface_network() -> anyhow::Result<Ipv4Network> {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    let interfaces = NetworkInterface::show().context("enumerating network interfaces")?;
    for iface in interfaces {
        if iface.name == "lo" || iface.name.starts_with("lo") {
            continue;
        }
        for addr in iface.addr {
            if let network_interface::Addr::V4(v4) = addr {
                if v4.ip.is_loopback() || v4.ip.is_unspecified() {
                    continue;
                }
                let prefix = v4
                    .netmask
                    .map(|m| u32::from(m).count_ones() as u8)
                    .unwrap_or(24);
                if let Ok(net) = Ipv4Network::new(v4.ip, prefix) {
                    return Ok(net);
                }
            }
        }
    }
    anyhow::bail!("no usable IPv4 interface found")
}

async fn fetch_and_normalize(
    client: &reqwest::Client,
    location: &str,
    fetch_opts: &FetchOptions,
    discovery_method: DiscoveryMethod,
) -> anyhow::Result<Device> {
    let url = Url::parse(location).with_context(|| format!("bad LOCATION url: {location}"))?;
    let body = upnp_recon_net::fetch_text(client, &url, fetch_opts).await?;
    let mut device = upnp_recon_xml::parse_device_description(&body, &url)?;
    device.discovery_method = discovery_method;
    Ok(device)
}

/// The interface address to bind the SSDP socket and the port sweep's
/// probing-host exclusion to: the CIDR's address when one is configured,
/// else the default interface, else unspecified (spec §4.1 step 1, §6).
fn interface_ip(opts: &DiscoveryOptions) -> Ipv4Addr {
    if let Some(cidr) = opts.cidr {
        return cidr.ip();
    }
    default_interface_network()
        .map(|net| net.ip())
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Phase 1: SSDP sweep + description fetch, spec §4.1 steps 1 and 3.
#[instrument(skip_all, fields(timeout = ?opts.timeout))]
async fn ssdp_devices(opts: &DiscoveryOptions, client: &reqwest::Client) -> Vec<Device> {
    let responses = match upnp_recon_net::search_all(opts.timeout, interface_ip(opts)).await {
        Ok(r) => r,
        Err(e) => {
            warn!("SSDP sweep failed entirely: {e:#}");
            Vec::new()
        }
    };

    // Dedup by LOCATION before fetching, spec §4.1 step 1.
    let mut by_location: HashMap<String, SsdpResponse> = HashMap::new();
    for resp in responses {
        by_location.entry(resp.location.clone()).or_insert(resp);
    }

    let fetch_opts = FetchOptions {
        timeout: opts.timeout,
        ..Default::default()
    };

    let mut devices = Vec::new();
    for (location, resp) in by_location {
        match fetch_and_normalize(client, &location, &fetch_opts, DiscoveryMethod::Ssdp).await {
            Ok(mut device) => {
                device.server_header = resp.server;
                devices.push(device);
            }
            Err(e) => debug!(location, "description fetch/parse failed: {e:#}"),
        }
    }
    devices
}

/// Phase 2: bounded TCP connect sweep + best-effort description probe,
/// spec §4.1 step 2 (only runs when `aggressive`).
///
/// When `token` is given and fires before the sweep finishes, returns
/// whatever devices were already matched instead of waiting for the
/// remaining in-flight probes (spec §5, testable property #11).
#[instrument(skip_all)]
async fn port_scan_devices(
    opts: &DiscoveryOptions,
    client: &reqwest::Client,
    probing_host: Option<Ipv4Addr>,
    token: Option<&CancellationToken>,
) -> Vec<Device> {
    let Some(cidr) = opts.cidr else {
        warn!("aggressive scan requested but no CIDR available");
        return Vec::new();
    };

    let hosts = upnp_recon_net::hosts_in_cidr(cidr, probing_host);
    let open = upnp_recon_net::sweep_open_ports(
        hosts,
        opts.ports.clone(),
        opts.port_sweep_concurrency,
        Duration::from_secs(2),
        token,
    )
    .await;

    let semaphore = Arc::new(Semaphore::new(opts.port_sweep_concurrency.max(1)));
    let fetch_opts = FetchOptions {
        timeout: opts.timeout,
        ..Default::default()
    };

    let mut tasks = FuturesUnordered::new();
    for addr in open {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let fetch_opts = fetch_opts.clone();
        tasks.push(async move {
            let _permit = semaphore.acquire().await.ok()?;
            for path in DESCRIPTION_PATHS {
                let url = format!("http://{}{}", addr, path);
                if let Ok(parsed_url) = Url::parse(&url) {
                    if let Ok(body) = upnp_recon_net::fetch_text(&client, &parsed_url, &fetch_opts).await {
                        if let Ok(mut device) =
                            upnp_recon_xml::parse_device_description(&body, &parsed_url)
                        {
                            device.discovery_method = DiscoveryMethod::PortScan;
                            // Only the first 200 response per endpoint is used
                            // (spec §4.1 step 2: "only one description URL is
                            // tried once" to avoid the duplicate-explosion
                            // pathology).
                            return Some(device);
                        }
                    }
                }
            }
            None
        });
    }

    let mut devices = Vec::new();
    loop {
        let next = match token {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = tasks.next() => result,
                }
            }
            None => tasks.next().await,
        };
        match next {
            Some(Some(device)) => devices.push(device),
            Some(None) => {}
            None => break,
        }
    }
    devices
}

/// Merges a flat list of raw `Device` observations into the deduplicated
/// set, applying the identity rule of spec §3 / §4.1 step 4.
fn dedup(devices: Vec<Device>) -> Vec<Device> {
    let mut by_identity: HashMap<DeviceIdentity, Device> = HashMap::new();
    for device in devices {
        let identity = device.identity();
        match by_identity.remove(&identity) {
            Some(mut existing) => {
                existing.merge_from(device);
                by_identity.insert(existing.identity(), existing);
            }
            None => {
                by_identity.insert(identity, device);
            }
        }
    }
    let mut out: Vec<Device> = by_identity.into_values().collect();
    out.sort_by(|a, b| a.ip.cmp(&b.ip).then(a.port.cmp(&b.port)));
    out
}

/// Runs the full Discovery Engine: SSDP sweep, optional port sweep,
/// description fetch, and dedup (spec §4.1). Fails only if a port sweep was
/// requested and no interface CIDR could be determined or supplied.
pub async fn discover(opts: &DiscoveryOptions) -> anyhow::Result<Vec<Device>> {
    let client = upnp_recon_net::build_client(&FetchOptions {
        timeout: opts.timeout,
        ..Default::default()
    })?;

    let mut all = ssdp_devices(opts, &client).await;

    if opts.aggressive {
        let cidr = match opts.cidr {
            Some(c) => c,
            None => default_interface_network().context("auto-detecting CIDR for port sweep")?,
        };
        let probing_host = cidr.ip().into();
        let mut scoped = opts.clone();
        scoped.cidr = Some(cidr);
        all.extend(port_scan_devices(&scoped, &client, Some(probing_host), None).await);
    }

    Ok(dedup(all))
}

/// Runs the Discovery Engine racing it against `token`. Unlike [`discover`],
/// a cancellation doesn't discard what's already been found: it returns
/// whatever devices the SSDP sweep and/or port sweep had gathered up to
/// that point (spec §5 "partial results already collected must be returned
/// to the caller", testable property #11), rather than an error.
pub async fn discover_cancelable(
    opts: &DiscoveryOptions,
    token: &CancellationToken,
) -> anyhow::Result<Vec<Device>> {
    let client = upnp_recon_net::build_client(&FetchOptions {
        timeout: opts.timeout,
        ..Default::default()
    })?;

    let mut all = tokio::select! {
        _ = token.cancelled() => return Ok(Vec::new()),
        devices = ssdp_devices(opts, &client) => devices,
    };

    if opts.aggressive && !token.is_cancelled() {
        let cidr = match opts.cidr {
            Some(c) => c,
            None => default_interface_network().context("auto-detecting CIDR for port sweep")?,
        };
        let probing_host = cidr.ip().into();
        let mut scoped = opts.clone();
        scoped.cidr = Some(cidr);
        all.extend(port_scan_devices(&scoped, &client, Some(probing_host), Some(token)).await);
    }

    Ok(dedup(all))
}

#[cfg(test)]
mod tests {
    use super::*;
    use upnp_recon_core::Service;

    fn device(ip: Ipv4Addr, port: u16, method: DiscoveryMethod, udn: Option<&str>) -> Device {
        Device {
            ip,
            port,
            udn: udn.map(|s| s.to_string()),
            friendly_name: String::new(),
            manufacturer: String::new(),
            model_name: String::new(),
            model_number: String::new(),
            device_type: String::new(),
            description_url: Url::parse(&format!("http://{ip}:{port}/desc.xml")).unwrap(),
            server_header: String::new(),
            discovery_method: method,
            first_seen: 0,
            last_seen: 0,
            services: Vec::new(),
        }
    }

    #[test]
    fn dedup_is_idempotent_on_already_unique_devices() {
        let devices = vec![
            device(Ipv4Addr::new(192, 0, 2, 1), 1400, DiscoveryMethod::Ssdp, Some("uuid:a")),
            device(Ipv4Addr::new(192, 0, 2, 2), 1400, DiscoveryMethod::Ssdp, Some("uuid:b")),
        ];
        let first = dedup(devices.clone());
        let second = dedup(first.clone());
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn ssdp_record_wins_over_port_scan_duplicate() {
        let mut port_scanned = device(Ipv4Addr::new(192, 0, 2, 5), 1400, DiscoveryMethod::PortScan, None);
        port_scanned.services.push(Service {
            service_type: "urn:schemas-upnp-org:service:AVTransport:1".into(),
            service_id: "AVTransport".into(),
            control_url: Url::parse("http://192.0.2.5:1400/ctl").unwrap(),
            event_sub_url: None,
            scpd_url: Url::parse("http://192.0.2.5:1400/scpd").unwrap(),
        });
        let mut ssdp = device(Ipv4Addr::new(192, 0, 2, 5), 1400, DiscoveryMethod::Ssdp, None);
        ssdp.friendly_name = "Sonos Port".to_string();

        let merged = dedup(vec![port_scanned, ssdp]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].discovery_method, DiscoveryMethod::Ssdp);
        assert_eq!(merged[0].friendly_name, "Sonos Port");
        assert_eq!(merged[0].services.len(), 1);
    }

    #[test]
    fn duplicate_ssdp_announcements_collapse_to_one_device() {
        // Simulates the same physical device announcing rootdevice + several
        // embedded device types, all with the same UDN (spec §4.1 rationale).
        let devices = (0..12)
            .map(|_| device(Ipv4Addr::new(192, 0, 2, 9), 1400, DiscoveryMethod::Ssdp, Some("uuid:same")))
            .collect();
        let merged = dedup(devices);
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn canceled_port_scan_returns_immediately_without_waiting_on_the_sweep() {
        let opts = DiscoveryOptions {
            cidr: Some(Ipv4Network::new(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap()),
            timeout: Duration::from_secs(5),
            aggressive: true,
            ports: vec![65533],
            port_sweep_concurrency: 16,
        };
        let client = upnp_recon_net::build_client(&FetchOptions::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let devices = port_scan_devices(&opts, &client, None, Some(&token)).await;
        assert!(devices.is_empty());
    }

    #[test]
    fn output_is_sorted_by_ip_then_port() {
        let devices = vec![
            device(Ipv4Addr::new(192, 0, 2, 9), 80, DiscoveryMethod::Ssdp, Some("uuid:c")),
            device(Ipv4Addr::new(192, 0, 2, 2), 1400, DiscoveryMethod::Ssdp, Some("uuid:a")),
            device(Ipv4Addr::new(192, 0, 2, 2), 80, DiscoveryMethod::Ssdp, Some("uuid:b")),
        ];
        let merged = dedup(devices);
        let ips: Vec<_> = merged.iter().map(|d| (d.ip, d.port)).collect();
        assert_eq!(
            ips,
            vec![
                (Ipv4Addr::new(192, 0, 2, 2), 80),
                (Ipv4Addr::new(192, 0, 2, 2), 1400),
                (Ipv4Addr::new(192, 0, 2, 9), 80),
            ]
        );
    }
}
