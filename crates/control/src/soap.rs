use std::collections::HashMap;

use upnp_recon_core::{ActionArgument, RconError, Result};

/// Builds a SOAP 1.1 envelope for `action` on `service_type`, with
/// `arguments` encoded as direct children of the action element in the
/// order given by `ordered_args` (the order declared in the SCPD, spec
/// §4.4: "encodes arguments as direct children in the order declared in
/// the SCPD").
pub fn build_envelope(
    service_type: &str,
    action: &str,
    ordered_args: &[ActionArgument],
    arguments: &HashMap<String, String>,
) -> Result<String> {
    let mut body = String::new();
    for arg in ordered_args {
        let value = arguments
            .get(&arg.name)
            .ok_or_else(|| RconError::InvalidArgument(format!("missing argument {}", arg.name)))?;
        body.push_str(&format!(
            "<{name}>{value}</{name}>",
            name = arg.name,
            value = xml_escape(value)
        ));
    }

    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\n\
<s:Body><u:{action} xmlns:u=\"{service_type}\">{body}</u:{action}></s:Body>\n\
</s:Envelope>"
    ))
}

pub fn soap_action_header(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The outcome of parsing a SOAP response body: either the named output
/// arguments of a successful call, or a structured fault (spec §4.4: "on
/// SOAP fault, return structured error").
pub enum ParsedResponse {
    Outputs(HashMap<String, String>),
    Fault { code: String, desc: String, upnp_code: Option<u32> },
}

fn local_name(tag: &str) -> &str {
    tag.rsplit(':').next().unwrap_or(tag)
}

/// Parses a SOAP response body, looking for `<u:{action}Response>` output
/// arguments or a `<s:Fault>` element (spec §4.4).
pub fn parse_response(action: &str, body: &str) -> Result<ParsedResponse> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| RconError::MalformedXml(format!("SOAP response: {e}")))?;

    let soap_body = doc
        .descendants()
        .find(|n| n.is_element() && local_name(n.tag_name().name()) == "Body")
        .ok_or_else(|| RconError::MalformedXml("SOAP response missing Body".to_string()))?;

    if let Some(fault) = soap_body
        .children()
        .find(|c| c.is_element() && local_name(c.tag_name().name()) == "Fault")
    {
        let code = fault
            .children()
            .find(|c| c.is_element() && local_name(c.tag_name().name()) == "faultcode")
            .and_then(|n| n.text())
            .unwrap_or_default()
            .to_string();
        let desc = fault
            .children()
            .find(|c| c.is_element() && local_name(c.tag_name().name()) == "faultstring")
            .and_then(|n| n.text())
            .unwrap_or_default()
            .to_string();
        let upnp_code = fault
            .descendants()
            .find(|n| n.is_element() && local_name(n.tag_name().name()) == "errorCode")
            .and_then(|n| n.text())
            .and_then(|t| t.trim().parse().ok());

        return Ok(ParsedResponse::Fault { code, desc, upnp_code });
    }

    let response_tag = format!("{action}Response");
    let response_node = soap_body
        .children()
        .find(|c| c.is_element() && local_name(c.tag_name().name()) == response_tag)
        .ok_or_else(|| RconError::MalformedXml(format!("missing <{response_tag}>")))?;

    let mut outputs = HashMap::new();
    for child in response_node.children().filter(|c| c.is_element()) {
        outputs.insert(
            local_name(child.tag_name().name()).to_string(),
            child.text().unwrap_or_default().to_string(),
        );
    }

    Ok(ParsedResponse::Outputs(outputs))
}
