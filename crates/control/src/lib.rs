//! Control Engine (spec §4.4): builds a request in the protocol family
//! selected by the matched profile, transports it (with stealth/retry),
//! and parses the response into a uniform `ActionResult`.

pub mod adapters;
pub mod soap;
pub mod transport;

use std::collections::HashMap;

use upnp_recon_core::{Device, RconError, Service, SoapAction};
use upnp_recon_profiles::{DeviceProfile, ScoredProfile};
use url::Url;

pub use transport::{HttpTransport, OutboundRequest, Transport, TransportOptions};

/// Classified failure reasons for a completed `ActionResult` (spec §4.4
/// state machine: `FAIL` classifies into one of these).
#[derive(Debug, Clone)]
pub enum ClassifiedError {
    TransportError(String),
    HttpError(u16),
    ProtocolError(String),
    ActionError { code: String, desc: String, upnp_code: Option<u32> },
    NotImplemented { discovered_endpoint: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub outputs: HashMap<String, String>,
    pub error: Option<ClassifiedError>,
    pub request_snippet: Option<String>,
    pub response_snippet: Option<String>,
}

impl ActionResult {
    fn ok(outputs: HashMap<String, String>) -> Self {
        Self { status: ActionStatus::Ok, outputs, error: None, request_snippet: None, response_snippet: None }
    }

    fn failed(error: ClassifiedError) -> Self {
        Self { status: ActionStatus::Failed, outputs: HashMap::new(), error: Some(error), request_snippet: None, response_snippet: None }
    }

    fn with_snippets(mut self, request: Option<String>, response: Option<String>) -> Self {
        self.request_snippet = request;
        self.response_snippet = response;
        self
    }
}

/// Resolves the control URL + service type to invoke `service_name`
/// against: the matched profile's `upnp` block takes precedence when it
/// names the service, otherwise falls back to the device's own
/// description (spec §4.4: "Generic UPnP fallback — ... using service
/// URNs and control URLs literally from the device's own description
/// rather than the profile").
fn resolve_upnp_target<'a>(
    device: &'a Device,
    profile: Option<&DeviceProfile>,
    service_name: &str,
) -> Option<(String, Url)> {
    if let Some(profile) = profile {
        if let Some(endpoint) = profile.upnp.as_ref().and_then(|m| m.get(service_name)) {
            if let Ok(url) = Url::parse(&endpoint.control_url) {
                return Some((endpoint.service_type.clone(), url));
            }
        }
    }

    device
        .services
        .iter()
        .find(|s: &&Service| s.short_name() == service_name)
        .map(|s| (s.service_type.clone(), s.control_url.clone()))
}

/// Executes a UPnP/SOAP action (spec §4.4 UPnP/SOAP adapter and generic
/// fallback, which share the same wire format).
async fn invoke_upnp(
    transport: &dyn Transport,
    device: &Device,
    profile: Option<&DeviceProfile>,
    service_name: &str,
    action: &SoapAction,
    arguments: HashMap<String, String>,
    opts: &TransportOptions,
) -> ActionResult {
    let Some((service_type, control_url)) = resolve_upnp_target(device, profile, service_name) else {
        return ActionResult::failed(ClassifiedError::ProtocolError(format!(
            "no control URL known for service {service_name}"
        )));
    };

    let envelope = match soap::build_envelope(&service_type, &action.name, &action.arguments_in, &arguments) {
        Ok(e) => e,
        Err(RconError::InvalidArgument(msg)) => {
            return ActionResult::failed(ClassifiedError::ProtocolError(msg));
        }
        Err(e) => return ActionResult::failed(ClassifiedError::ProtocolError(e.to_string())),
    };

    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "text/xml; charset=\"utf-8\"".to_string());
    headers.insert("SOAPAction".to_string(), soap::soap_action_header(&service_type, &action.name));

    let request = OutboundRequest {
        method: reqwest::Method::POST,
        url: control_url,
        headers,
        body: envelope.clone().into_bytes(),
    };

    let request_snippet = Some(transport::snippet_of(envelope.as_bytes(), opts));

    // A 500 status carrying a parseable `<s:Fault>` is a deliberate
    // business-logic response, not a transient server failure, and must
    // never be retried (spec §4.4, testable property #9).
    let action_name = action.name.clone();
    let retry_on_response = move |resp: &transport::InboundResponse| {
        let text = String::from_utf8_lossy(&resp.body);
        !matches!(
            soap::parse_response(&action_name, &text),
            Ok(soap::ParsedResponse::Fault { .. })
        )
    };

    match transport::send_with_retry_checked(transport, request, opts, retry_on_response).await {
        Ok(response) => {
            let response_text = String::from_utf8_lossy(&response.body).into_owned();
            let response_snippet = Some(transport::snippet_of(response.body.as_slice(), opts));
            match soap::parse_response(&action.name, &response_text) {
                Ok(soap::ParsedResponse::Outputs(outputs)) => {
                    ActionResult::ok(outputs).with_snippets(request_snippet, response_snippet)
                }
                Ok(soap::ParsedResponse::Fault { code, desc, upnp_code }) => {
                    ActionResult::failed(ClassifiedError::ActionError { code, desc, upnp_code })
                        .with_snippets(request_snippet, response_snippet)
                }
                Err(_) if response.status >= 400 => {
                    ActionResult::failed(ClassifiedError::HttpError(response.status))
                        .with_snippets(request_snippet, response_snippet)
                }
                Err(e) => ActionResult::failed(ClassifiedError::ProtocolError(e.to_string()))
                    .with_snippets(request_snippet, response_snippet),
            }
        }
        Err(RconError::HttpStatus { code }) => {
            ActionResult::failed(ClassifiedError::HttpError(code)).with_snippets(request_snippet, None)
        }
        Err(e) => ActionResult::failed(ClassifiedError::TransportError(e.to_string()))
            .with_snippets(request_snippet, None),
    }
}

/// Qualified action names route to either a UPnP service action
/// (`service_name.ActionName`, e.g. `avtransport.Play`) or a vendor
/// protocol command (`protocol:command`, e.g. `cast:launch`,
/// `ecp:launch`, `wam:play`). This keeps Control's entry point a single
/// string, as spec §4.4's `invoke` signature calls for, while still
/// letting a caller bypass the device's `primary_protocol` to reach a
/// UPnP action on an otherwise Cast-primary device.
enum QualifiedAction<'a> {
    Upnp { service_name: &'a str, action: &'a str },
    Vendor { protocol: &'a str, command: &'a str },
}

fn parse_qualified_action(qualified: &str) -> Option<QualifiedAction<'_>> {
    if let Some((protocol, command)) = qualified.split_once(':') {
        return Some(QualifiedAction::Vendor { protocol, command });
    }
    qualified
        .split_once('.')
        .map(|(service_name, action)| QualifiedAction::Upnp { service_name, action })
}

/// Executes `action_qualified_name` on `device` (spec §4.4 `invoke`).
/// `scpd_action` must be supplied for UPnP-routed calls (the Profiling
/// Engine's inventory is the source of truth for argument order); it is
/// ignored for vendor-protocol calls.
#[allow(clippy::too_many_arguments)]
pub async fn invoke(
    transport: &dyn Transport,
    device: &Device,
    profile_match: Option<&ScoredProfile>,
    action_qualified_name: &str,
    arguments: HashMap<String, String>,
    scpd_action: Option<&SoapAction>,
    opts: &TransportOptions,
) -> Result<ActionResult, RconError> {
    let profile = profile_match.map(|m| &m.profile);

    let Some(parsed) = parse_qualified_action(action_qualified_name) else {
        return Ok(ActionResult::failed(ClassifiedError::ProtocolError(format!(
            "unrecognized qualified action name: {action_qualified_name}"
        ))));
    };

    let result = match parsed {
        QualifiedAction::Upnp { service_name, action: action_name } => {
            let Some(scpd_action) = scpd_action else {
                return Ok(ActionResult::failed(ClassifiedError::ProtocolError(
                    "UPnP action invoked without an SCPD action definition".to_string(),
                )));
            };
            if scpd_action.name != action_name {
                return Ok(ActionResult::failed(ClassifiedError::ProtocolError(format!(
                    "qualified action {action_name} does not match SCPD action {}",
                    scpd_action.name
                ))));
            }
            invoke_upnp(transport, device, profile, service_name, scpd_action, arguments, opts).await
        }
        QualifiedAction::Vendor { protocol, command } => match protocol {
            "ecp" => match adapters::invoke_ecp(transport, device, command, &arguments, opts).await {
                Ok(outputs) => ActionResult::ok(outputs),
                Err(e) => ActionResult::failed(e),
            },
            "wam" => match adapters::invoke_wam(transport, device, command, opts).await {
                Ok(outputs) => ActionResult::ok(outputs),
                Err(e) => ActionResult::failed(e),
            },
            "cast" => {
                let Some(profile) = profile else {
                    return Ok(ActionResult::failed(ClassifiedError::ProtocolError(
                        "cast adapter requires a matched profile".to_string(),
                    )));
                };
                ActionResult::failed(adapters::invoke_cast(device, profile))
            }
            "heos" | "musiccast" | "jsonrpc" | "soundtouch" => {
                let Some(profile) = profile else {
                    return Ok(ActionResult::failed(ClassifiedError::ProtocolError(format!(
                        "{protocol} adapter requires a matched profile"
                    ))));
                };
                let templated = match protocol {
                    "heos" => profile.heos.as_ref().map(|h| (h.port, h.endpoint.clone())),
                    "musiccast" => profile.musiccast.as_ref().and_then(|g| {
                        g.port.zip(g.fields.get("endpoint").and_then(|v| v.as_str()).map(|s| s.to_string()))
                    }),
                    "jsonrpc" => profile.jsonrpc.as_ref().and_then(|g| {
                        g.port.zip(g.fields.get("endpoint").and_then(|v| v.as_str()).map(|s| s.to_string()))
                    }),
                    "soundtouch" => profile.soundtouch.as_ref().and_then(|g| {
                        g.port.zip(g.fields.get("endpoint").and_then(|v| v.as_str()).map(|s| s.to_string()))
                    }),
                    _ => unreachable!(),
                };
                match templated {
                    Some((port, endpoint)) => {
                        match adapters::invoke_templated(transport, device.ip, port, &endpoint, &arguments, opts).await {
                            Ok(outputs) => ActionResult::ok(outputs),
                            Err(e) => ActionResult::failed(e),
                        }
                    }
                    None => ActionResult::failed(ClassifiedError::ProtocolError(format!(
                        "profile has no {protocol} endpoint configured"
                    ))),
                }
            }
            other => ActionResult::failed(ClassifiedError::ProtocolError(format!(
                "unknown protocol in qualified action name: {other}"
            ))),
        },
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use upnp_recon_core::{ActionArgument, Direction, DiscoveryMethod};

    struct CannedTransport {
        body: String,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, _request: &OutboundRequest) -> Result<transport::InboundResponse, RconError> {
            Ok(transport::InboundResponse { status: 200, body: self.body.clone().into_bytes() })
        }
    }

    fn device() -> Device {
        Device {
            ip: Ipv4Addr::new(192, 0, 2, 5),
            port: 1400,
            udn: None,
            friendly_name: "Test Renderer".to_string(),
            manufacturer: "Sonos, Inc.".to_string(),
            model_name: "Port".to_string(),
            model_number: String::new(),
            device_type: "urn:schemas-upnp-org:device:ZonePlayer:1".to_string(),
            description_url: Url::parse("http://192.0.2.5:1400/desc.xml").unwrap(),
            server_header: String::new(),
            discovery_method: DiscoveryMethod::Ssdp,
            first_seen: 0,
            last_seen: 0,
            services: vec![Service {
                service_type: "urn:schemas-upnp-org:service:RenderingControl:1".to_string(),
                service_id: "RenderingControl".to_string(),
                control_url: Url::parse("http://192.0.2.5:1400/MediaRenderer/RenderingControl/Control").unwrap(),
                event_sub_url: None,
                scpd_url: Url::parse("http://192.0.2.5:1400/xml/RenderingControl1.xml").unwrap(),
            }],
        }
    }

    fn get_volume_action() -> SoapAction {
        SoapAction::new(
            "GetVolume".to_string(),
            vec![
                ActionArgument {
                    name: "InstanceID".to_string(),
                    direction: Direction::In,
                    data_type: "ui4".to_string(),
                    related_state_variable: None,
                    allowed_values: None,
                    range: None,
                },
                ActionArgument {
                    name: "Channel".to_string(),
                    direction: Direction::In,
                    data_type: "string".to_string(),
                    related_state_variable: None,
                    allowed_values: None,
                    range: None,
                },
            ],
            vec![ActionArgument {
                name: "CurrentVolume".to_string(),
                direction: Direction::Out,
                data_type: "ui2".to_string(),
                related_state_variable: None,
                allowed_values: None,
                range: None,
            }],
        )
    }

    #[tokio::test]
    async fn generic_upnp_fallback_invokes_against_device_own_description() {
        let transport = CannedTransport {
            body: r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
                        <CurrentVolume>17</CurrentVolume>
                    </u:GetVolumeResponse>
                </s:Body>
            </s:Envelope>"#.to_string(),
        };
        let action = get_volume_action();
        let mut arguments = HashMap::new();
        arguments.insert("InstanceID".to_string(), "0".to_string());
        arguments.insert("Channel".to_string(), "Master".to_string());

        let result = invoke(
            &transport,
            &device(),
            None,
            "renderingcontrol.GetVolume",
            arguments,
            Some(&action),
            &TransportOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.status, ActionStatus::Ok);
        assert_eq!(result.outputs.get("CurrentVolume").unwrap(), "17");
    }

    #[tokio::test]
    async fn soap_fault_becomes_action_error() {
        let transport = CannedTransport {
            body: r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Client</faultcode>
                        <faultstring>UPnPError</faultstring>
                        <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>402</errorCode></UPnPError></detail>
                    </s:Fault>
                </s:Body>
            </s:Envelope>"#.to_string(),
        };
        let action = get_volume_action();
        let mut arguments = HashMap::new();
        arguments.insert("InstanceID".to_string(), "0".to_string());
        arguments.insert("Channel".to_string(), "Master".to_string());

        let result = invoke(
            &transport,
            &device(),
            None,
            "renderingcontrol.GetVolume",
            arguments,
            Some(&action),
            &TransportOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.status, ActionStatus::Failed);
        assert!(matches!(result.error, Some(ClassifiedError::ActionError { upnp_code: Some(402), .. })));
    }

    struct CannedStatusTransport {
        status: u16,
        body: String,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for CannedStatusTransport {
        async fn send(&self, _request: &OutboundRequest) -> Result<transport::InboundResponse, RconError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(transport::InboundResponse { status: self.status, body: self.body.clone().into_bytes() })
        }
    }

    #[tokio::test]
    async fn soap_fault_over_http_500_is_classified_and_not_retried() {
        // UPnP devices commonly send a SOAP fault with HTTP status 500
        // (spec §4.4, testable property #9: errorCode 701 -> SoapFault, no retry).
        let transport = CannedStatusTransport {
            status: 500,
            body: r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Client</faultcode>
                        <faultstring>UPnPError</faultstring>
                        <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>701</errorCode></UPnPError></detail>
                    </s:Fault>
                </s:Body>
            </s:Envelope>"#.to_string(),
            calls: std::sync::atomic::AtomicU32::new(0),
        };
        let action = get_volume_action();
        let mut arguments = HashMap::new();
        arguments.insert("InstanceID".to_string(), "0".to_string());
        arguments.insert("Channel".to_string(), "Master".to_string());

        let result = invoke(
            &transport,
            &device(),
            None,
            "renderingcontrol.GetVolume",
            arguments,
            Some(&action),
            &TransportOptions { max_attempts: 5, ..Default::default() },
        )
        .await
        .unwrap();

        assert!(matches!(result.error, Some(ClassifiedError::ActionError { upnp_code: Some(701), .. })));
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_service_fails_with_protocol_error() {
        let action = get_volume_action();
        let transport = CannedTransport { body: String::new() };
        let result = invoke(
            &transport,
            &device(),
            None,
            "nosuchservice.GetVolume",
            HashMap::new(),
            Some(&action),
            &TransportOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.status, ActionStatus::Failed);
        assert!(matches!(result.error, Some(ClassifiedError::ProtocolError(_))));
    }
}
