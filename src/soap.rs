//! SOAP 1.1 action client for the WAN connection control endpoint.
//!
//! One generic invoke path serves every supported action: the request
//! is a minimal envelope with ordered argument elements, the response
//! is flattened into a local-name → text map that the typed decode
//! layer (see [`crate::mapping`]) interprets per action.

use std::collections::HashMap;

use xmltree::{Element, XMLNode};

use crate::error::{UpnpError, UpnpResult};

/// Service namespace all actions target
pub const SERVICE_NS: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

pub const ACTION_ADD_PORT_MAPPING: &str = "AddPortMapping";
pub const ACTION_DELETE_PORT_MAPPING: &str = "DeletePortMapping";
pub const ACTION_GET_GENERIC_ENTRY: &str = "GetGenericPortMappingEntry";
pub const ACTION_GET_EXTERNAL_IP: &str = "GetExternalIPAddress";

/// Build the request envelope for `action` with arguments in the given
/// order. Argument order matters to some gateway firmwares even though
/// SOAP itself does not require it.
pub fn envelope(action: &str, args: &[(&str, String)]) -> String {
    let mut body = String::new();
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", escape_xml(value)));
    }
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:{action} xmlns:u="{SERVICE_NS}">{body}</u:{action}>
</s:Body>
</s:Envelope>"#
    )
}

/// POST `action` to the control endpoint and return the flattened
/// response fields.
///
/// A non-success HTTP status becomes [`UpnpError::ActionRejected`] with
/// the raw body attached — fault bodies are not assumed to be
/// well-formed SOAP. On success, the Body's first child element's
/// direct children become the field map.
pub async fn invoke(
    http: &reqwest::Client,
    control_url: &str,
    action: &str,
    args: &[(&str, String)],
) -> UpnpResult<HashMap<String, String>> {
    let request = envelope(action, args);
    tracing::debug!("SOAP {action} -> {control_url}");

    let response = http
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{SERVICE_NS}#{action}\""))
        .body(request)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        tracing::debug!("SOAP {action} rejected with HTTP {}", status.as_u16());
        return Err(UpnpError::ActionRejected {
            action: action.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    flatten_response(&body)
}

/// Flatten a successful SOAP response: locate the Body element, take
/// its first child element (`u:<Action>Response`), and map each direct
/// child's local name to its text content.
pub(crate) fn flatten_response(body: &str) -> UpnpResult<HashMap<String, String>> {
    let root = Element::parse(body.as_bytes())
        .map_err(|e| UpnpError::MalformedResponse(format!("unparsable SOAP body: {e}")))?;
    let soap_body = root
        .get_child("Body")
        .ok_or_else(|| UpnpError::MalformedResponse("SOAP envelope has no Body".into()))?;
    let payload = soap_body
        .children
        .iter()
        .find_map(|node| match node {
            XMLNode::Element(e) => Some(e),
            _ => None,
        })
        .ok_or_else(|| UpnpError::MalformedResponse("SOAP Body is empty".into()))?;

    let mut fields = HashMap::new();
    for node in &payload.children {
        if let XMLNode::Element(field) = node {
            let text = field.get_text().map(|t| t.into_owned()).unwrap_or_default();
            fields.insert(field.name.clone(), text);
        }
    }
    Ok(fields)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
