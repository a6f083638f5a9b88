//! Gateway description resolution: fetch the device description a
//! gateway advertised over SSDP and extract the control path of its
//! WAN connection service.

use xmltree::{Element, XMLNode};

use crate::error::{UpnpError, UpnpResult};

/// A resolved gateway control target. Never cached — every top-level
/// operation resolves a fresh one, so a router that changed address
/// between calls is picked up on the next operation.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    /// URL of the device description document
    pub location: String,
    /// Control path of the WAN connection service
    pub control_path: String,
}

impl GatewayEndpoint {
    /// Full URL of the SOAP control endpoint.
    ///
    /// The SOAP listener lives on the same host as the description
    /// server; the control path is usually relative (and often carries
    /// its own port on devices that embed an absolute URL).
    pub fn control_url(&self) -> UpnpResult<String> {
        if self.control_path.starts_with("http") {
            return Ok(self.control_path.clone());
        }
        let base = reqwest::Url::parse(&self.location)
            .map_err(|e| UpnpError::MalformedResponse(format!("bad LOCATION url: {e}")))?;
        let host = base
            .host_str()
            .ok_or_else(|| UpnpError::MalformedResponse("LOCATION url has no host".into()))?;
        let origin = match base.port() {
            Some(port) => format!("{}://{host}:{port}", base.scheme()),
            None => format!("{}://{host}", base.scheme()),
        };
        if self.control_path.starts_with('/') {
            Ok(format!("{origin}{}", self.control_path))
        } else {
            Ok(format!("{origin}/{}", self.control_path))
        }
    }
}

/// Fetch `location` and return the control path of the first
/// WANIPConnection/WANPPPConnection service it describes.
///
/// Failure classes stay distinct: an HTTP error reaching the
/// description server is [`UpnpError::Transport`], a body that is not
/// XML is [`UpnpError::MalformedResponse`], and only a well-formed
/// description without a matching service is
/// [`UpnpError::NoCompatibleService`].
pub async fn resolve_control_path(
    http: &reqwest::Client,
    location: &str,
) -> UpnpResult<String> {
    let response = http.get(location).send().await?.error_for_status()?;
    let body = response.text().await?;
    extract_control_path(&body)?.ok_or_else(|| {
        tracing::warn!("device description at {location} has no WAN connection service");
        UpnpError::NoCompatibleService {
            location: location.to_string(),
        }
    })
}

/// Walk every `service` element in the description, at any nesting
/// depth (root device or embedded `deviceList` devices), and return the
/// `controlURL` of the first WAN connection service. `Ok(None)` means
/// the description parsed but lists no matching service.
pub(crate) fn extract_control_path(xml: &str) -> UpnpResult<Option<String>> {
    let root = Element::parse(xml.as_bytes())
        .map_err(|e| UpnpError::MalformedResponse(format!("unparsable device description: {e}")))?;
    Ok(find_wan_control_url(&root))
}

fn find_wan_control_url(element: &Element) -> Option<String> {
    if element.name == "service" {
        let service_type = element.get_child("serviceType")?.get_text()?;
        if service_type.contains("WANIPConnection") || service_type.contains("WANPPPConnection") {
            return Some(element.get_child("controlURL")?.get_text()?.into_owned());
        }
        return None;
    }
    for child in &element.children {
        if let XMLNode::Element(child) = child {
            if let Some(url) = find_wan_control_url(child) {
                return Some(url);
            }
        }
    }
    None
}
