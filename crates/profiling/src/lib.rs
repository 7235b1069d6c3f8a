//! Profiling Engine (spec §4.3): fans out one HTTP GET per service SCPD
//! URL, parses each independently, and assembles the full action
//! inventory for a device (or, in the mass variant, for a whole fleet).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use upnp_recon_core::{Device, DeviceIdentity, ScpdDocument, SoapAction};
use upnp_recon_net::FetchOptions;

/// `service_name -> action_name -> SoapAction` (spec §4.3 output).
pub type ActionInventory = HashMap<String, HashMap<String, SoapAction>>;

#[derive(Debug, Clone, Default)]
pub struct ScpdAnalysis {
    pub services_analyzed: usize,
    pub successful_parses: usize,
    pub total_actions: usize,
    pub parsing_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProfilingOptions {
    pub timeout: Duration,
    pub per_device_concurrency: usize,
    pub mass_concurrency: usize,
}

impl Default for ProfilingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            per_device_concurrency: 8,
            mass_concurrency: 16,
        }
    }
}

/// Profiles a single device: fetches and parses every service's SCPD,
/// bounded by `opts.per_device_concurrency` (spec §4.3).
#[instrument(skip_all, fields(device = %device.friendly_name, services = device.services.len()))]
pub async fn profile_device(
    device: &Device,
    client: &reqwest::Client,
    opts: &ProfilingOptions,
) -> (ActionInventory, ScpdAnalysis) {
    let semaphore = Arc::new(Semaphore::new(opts.per_device_concurrency.max(1)));
    let fetch_opts = FetchOptions {
        timeout: opts.timeout,
        ..Default::default()
    };

    let mut tasks = FuturesUnordered::new();
    for service in &device.services {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let fetch_opts = fetch_opts.clone();
        let service_name = service.short_name();
        let scpd_url = service.scpd_url.clone();

        tasks.push(async move {
            let _permit = semaphore.acquire().await.ok();
            let fetch = upnp_recon_net::fetch_text(&client, &scpd_url, &fetch_opts).await;
            let result = match fetch {
                Ok(body) => upnp_recon_xml::parse_scpd(&body).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            (service_name, result)
        });
    }

    let mut inventory: ActionInventory = HashMap::new();
    let mut analysis = ScpdAnalysis {
        services_analyzed: device.services.len(),
        ..Default::default()
    };

    while let Some((service_name, result)) = tasks.next().await {
        match result {
            Ok(scpd) => {
                analysis.successful_parses += 1;
                analysis.total_actions += scpd.actions.len();
                analysis.parsing_errors.extend(
                    scpd.parse_errors
                        .iter()
                        .map(|e| format!("{service_name}: {e}")),
                );
                inventory.entry(service_name).or_default().extend(scpd.actions);
            }
            Err(e) => {
                debug!(service_name, "SCPD fetch/parse failed: {e}");
                analysis.parsing_errors.push(format!("{service_name}: {e}"));
            }
        }
    }

    (inventory, analysis)
}

/// Mass variant: profiles every device in `devices` concurrently under a
/// global cap (spec §4.3 "Mass variant"), keyed by device identity.
///
/// When `token` is given and fires before the fleet finishes, returns
/// whatever devices had already been profiled instead of waiting for the
/// rest (spec §5, testable property #11).
async fn profile_devices_impl(
    devices: &[Device],
    client: &reqwest::Client,
    opts: &ProfilingOptions,
    token: Option<&CancellationToken>,
) -> HashMap<DeviceIdentity, (ActionInventory, ScpdAnalysis)> {
    let semaphore = Arc::new(Semaphore::new(opts.mass_concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for device in devices {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let opts = opts.clone();
        let device = device.clone();
        tasks.push(async move {
            let _permit = semaphore.acquire().await.ok();
            let identity = device.identity();
            let result = profile_device(&device, &client, &opts).await;
            (identity, result)
        });
    }

    let mut out = HashMap::new();
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
            Some((identity, result)) => {
                out.insert(identity, result);
            }
            None => break,
        }
    }
    out
}

pub async fn profile_devices(
    devices: &[Device],
    client: &reqwest::Client,
    opts: &ProfilingOptions,
) -> HashMap<DeviceIdentity, (ActionInventory, ScpdAnalysis)> {
    profile_devices_impl(devices, client, opts, None).await
}

/// Like [`profile_devices`], but a cancellation doesn't discard what's
/// already been profiled: it returns whatever devices had finished instead
/// of an error (spec §5 "partial results already collected must be
/// returned to the caller", testable property #11).
pub async fn profile_devices_cancelable(
    devices: &[Device],
    client: &reqwest::Client,
    opts: &ProfilingOptions,
    token: &CancellationToken,
) -> HashMap<DeviceIdentity, (ActionInventory, ScpdAnalysis)> {
    profile_devices_impl(devices, client, opts, Some(token)).await
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub security: usize,
    pub volume_control: usize,
    pub media_control: usize,
    pub configuration: usize,
    pub information: usize,
    pub other: usize,
}

impl CategoryCounts {
    /// Aggregate capability counts per category across an inventory
    /// (spec §4.3: "plus aggregate capability counts (per category)").
    pub fn from_inventory(inventory: &ActionInventory) -> Self {
        use upnp_recon_core::Category;
        let mut counts = Self::default();
        for actions in inventory.values() {
            for action in actions.values() {
                match action.category {
                    Category::Security => counts.security += 1,
                    Category::VolumeControl => counts.volume_control += 1,
                    Category::MediaControl => counts.media_control += 1,
                    Category::Configuration => counts.configuration += 1,
                    Category::Information => counts.information += 1,
                    Category::Other => counts.other += 1,
                }
            }
        }
        counts
    }
}
