use upnp_recon_core::{Device, DiscoveryMethod, RconError, Result, Service};
use url::Url;

fn child_text<'a>(node: roxmltree::Node<'a, 'a>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
        .and_then(|c| c.text())
}

fn child_text_owned(node: roxmltree::Node<'_, '_>, name: &str) -> String {
    child_text(node, name).unwrap_or_default().trim().to_string()
}

fn find_descendant<'a>(node: roxmltree::Node<'a, 'a>, name: &str) -> Option<roxmltree::Node<'a, 'a>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Resolves a raw URL string against `base`, tolerating both absolute and
/// relative forms (spec §4.2: "Resolve each service's SCPDURL, controlURL,
/// eventSubURL against the base URL").
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    base.join(raw).ok()
}

fn parse_services(
    device_node: roxmltree::Node<'_, '_>,
    base: &Url,
) -> Vec<Service> {
    let mut services = Vec::new();
    if let Some(service_list) = device_node
        .children()
        .find(|c| c.is_element() && c.tag_name().name() == "serviceList")
    {
        for svc in service_list
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "service")
        {
            let service_type = child_text_owned(svc, "serviceType");
            let service_id = child_text_owned(svc, "serviceId");
            let scpd_raw = child_text_owned(svc, "SCPDURL");
            let control_raw = child_text_owned(svc, "controlURL");
            let event_raw = child_text_owned(svc, "eventSubURL");

            let (Some(scpd_url), Some(control_url)) =
                (resolve(base, &scpd_raw), resolve(base, &control_raw))
            else {
                // A service with no usable control/SCPD URL can't be invoked;
                // drop it rather than fail the whole document (spec §4.2:
                // missing fields are not fatal).
                continue;
            };

            services.push(Service {
                service_type,
                service_id,
                control_url,
                event_sub_url: resolve(base, &event_raw),
                scpd_url,
            });
        }
    }
    services
}

/// Recursively collects services from `device_node` and every nested
/// `<deviceList>/<device>` (e.g. IGD's WANDevice/WANConnectionDevice),
/// mirroring the teacher's `Device::iter_services`.
fn collect_all_services(device_node: roxmltree::Node<'_, '_>, base: &Url, out: &mut Vec<Service>) {
    out.extend(parse_services(device_node, base));
    if let Some(device_list) = device_node
        .children()
        .find(|c| c.is_element() && c.tag_name().name() == "deviceList")
    {
        for nested in device_list
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "device")
        {
            collect_all_services(nested, base, out);
        }
    }
}

/// Parses a UPnP device description document (spec §4.2). `fetch_url` is
/// the URL the document was retrieved from; it (or `<URLBase>` if present)
/// is the base against which relative service URLs resolve.
pub fn parse_device_description(xml: &str, fetch_url: &Url) -> Result<Device> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| RconError::MalformedXml(format!("{e}")))?;

    let root = doc.root_element();
    let device_node = find_descendant(root, "device")
        .ok_or_else(|| RconError::MalformedXml("missing <device> element".to_string()))?;

    let base = root
        .children()
        .find(|c| c.is_element() && c.tag_name().name() == "URLBase")
        .and_then(|n| n.text())
        .and_then(|s| Url::parse(s.trim()).ok())
        .unwrap_or_else(|| fetch_url.clone());

    let mut services = Vec::new();
    collect_all_services(device_node, &base, &mut services);

    let udn_raw = child_text_owned(device_node, "UDN");

    Ok(Device {
        ip: fetch_url
            .host_str()
            .and_then(|h| h.parse().ok())
            .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
        port: fetch_url.port_or_known_default().unwrap_or(80),
        udn: (!udn_raw.is_empty()).then_some(udn_raw),
        friendly_name: child_text_owned(device_node, "friendlyName"),
        manufacturer: child_text_owned(device_node, "manufacturer"),
        model_name: child_text_owned(device_node, "modelName"),
        model_number: child_text_owned(device_node, "modelNumber"),
        device_type: child_text_owned(device_node, "deviceType"),
        description_url: fetch_url.clone(),
        server_header: String::new(),
        discovery_method: DiscoveryMethod::Ssdp,
        first_seen: 0,
        last_seen: 0,
        services,
    })
}
