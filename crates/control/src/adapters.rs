use std::collections::HashMap;

use upnp_recon_core::{Device, RconError, Result};
use upnp_recon_profiles::DeviceProfile;

use crate::transport::{send_with_retry, InboundResponse, OutboundRequest, Transport, TransportOptions};
use crate::ClassifiedError;

/// Substitutes `{PLACEHOLDER}` tokens in a vendor endpoint template with
/// values from `arguments` (spec §4.4: "`{VOL}`, `{MEDIA_URL}`, `{TOKEN}`
/// substitution"). Unknown placeholders are left untouched rather than
/// failing the call — a template author may reference one the caller
/// doesn't need for this particular invocation.
pub fn substitute_placeholders(template: &str, arguments: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in arguments {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn classify_transport_err(e: RconError) -> ClassifiedError {
    match e {
        RconError::HttpStatus { code } => ClassifiedError::HttpError(code),
        RconError::MalformedXml(msg) => ClassifiedError::ProtocolError(msg),
        other => ClassifiedError::TransportError(other.to_string()),
    }
}

/// `send_with_retry` no longer turns a bad HTTP status into `Err` — the
/// body must reach the caller intact for SOAP-aware callers to inspect
/// (see `control::invoke_upnp`). Vendor adapters have no body-level
/// SOAP/fault format to parse, so they classify a bad status here instead.
fn classify_response(resp: InboundResponse) -> std::result::Result<HashMap<String, String>, ClassifiedError> {
    if resp.status >= 400 {
        Err(ClassifiedError::HttpError(resp.status))
    } else {
        Ok(HashMap::new())
    }
}

/// ECP adapter (Roku): form-encoded POST/GET against the well-known Roku
/// external control paths (spec §4.4).
pub async fn invoke_ecp(
    transport: &dyn Transport,
    device: &Device,
    command: &str,
    arguments: &HashMap<String, String>,
    opts: &TransportOptions,
) -> std::result::Result<HashMap<String, String>, ClassifiedError> {
    let path = match command {
        "device-info" => "/query/device-info",
        "launch" => "/launch/2213",
        "input" => "/input",
        other => return Err(ClassifiedError::ProtocolError(format!("unknown ECP command {other}"))),
    };
    let url = url::Url::parse(&format!("http://{}:8060{path}", device.ip))
        .map_err(|e| ClassifiedError::ProtocolError(e.to_string()))?;

    let body = arguments
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let request = OutboundRequest {
        method: reqwest::Method::POST,
        url,
        headers: HashMap::new(),
        body: body.into_bytes(),
    };

    match send_with_retry(transport, request, opts).await {
        Ok(resp) => classify_response(resp),
        Err(e) => Err(classify_transport_err(e)),
    }
}

/// WAM adapter (Samsung Wireless Audio Multiroom): GET against port 55001
/// with a `cmd=` query parameter (spec §4.4).
pub async fn invoke_wam(
    transport: &dyn Transport,
    device: &Device,
    command: &str,
    opts: &TransportOptions,
) -> std::result::Result<HashMap<String, String>, ClassifiedError> {
    let url = url::Url::parse(&format!(
        "http://{}:55001/UIC?cmd=<name>{command}</name>",
        device.ip
    ))
    .map_err(|e| ClassifiedError::ProtocolError(e.to_string()))?;

    let request = OutboundRequest {
        method: reqwest::Method::GET,
        url,
        headers: HashMap::new(),
        body: Vec::new(),
    };

    match send_with_retry(transport, request, opts).await {
        Ok(resp) => classify_response(resp),
        Err(e) => Err(classify_transport_err(e)),
    }
}

/// Cast adapter: identification only (spec §4.4: "invocation returns
/// `NotImplemented` with the discovered endpoint so a caller can use an
/// external Cast client").
pub fn invoke_cast(device: &Device, profile: &DeviceProfile) -> ClassifiedError {
    let endpoint = profile
        .cast
        .as_ref()
        .map(|c| format!("{}:{}", device.ip, c.port))
        .unwrap_or_else(|| format!("{}:8009", device.ip));
    ClassifiedError::NotImplemented { discovered_endpoint: endpoint }
}

/// Shared HTTP-with-templated-payload path for HEOS, MusicCast, JSON-RPC
/// and SoundTouch, whose profile blocks are all "port + endpoint template"
/// shaped (spec §4.4).
pub async fn invoke_templated(
    transport: &dyn Transport,
    host_ip: std::net::Ipv4Addr,
    port: u16,
    endpoint_template: &str,
    arguments: &HashMap<String, String>,
    opts: &TransportOptions,
) -> std::result::Result<HashMap<String, String>, ClassifiedError> {
    let path = substitute_placeholders(endpoint_template, arguments);
    let url = url::Url::parse(&format!("http://{host_ip}:{port}{path}"))
        .map_err(|e| ClassifiedError::ProtocolError(e.to_string()))?;

    let request = OutboundRequest {
        method: reqwest::Method::GET,
        url,
        headers: HashMap::new(),
        body: Vec::new(),
    };

    match send_with_retry(transport, request, opts).await {
        Ok(resp) => classify_response(resp),
        Err(e) => Err(classify_transport_err(e)),
    }
}
