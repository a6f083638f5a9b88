use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{UpnpError, UpnpResult};

/// Transport protocol of a port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Wire form used in SOAP arguments (`"TCP"` / `"UDP"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Protocol::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Protocol::Udp)
        } else {
            Err(UpnpError::MalformedResponse(format!(
                "unknown protocol {s:?}"
            )))
        }
    }
}

/// A NAT port mapping as the gateway reports it.
///
/// Identity for removal on the gateway is the pair
/// (`external_port`, `protocol`); UPnP does not require external ports
/// to be unique across protocols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_client: Ipv4Addr,
    pub internal_port: u16,
    pub description: String,
    /// Lease in seconds; 0 means infinite per UPnP convention
    pub lease_duration: u32,
    pub enabled: bool,
}

impl PortMapping {
    /// The (protocol, internal endpoint, external port) triple used to
    /// match renewal entries to live mappings.
    pub fn identity(&self) -> MappingIdentity {
        MappingIdentity {
            protocol: self.protocol,
            internal_client: self.internal_client,
            internal_port: self.internal_port,
            external_port: self.external_port,
        }
    }

    /// Ports are 1–65535 on the wire; 0 never names a real mapping.
    /// Checked before any network action.
    pub fn validate(&self) -> UpnpResult<()> {
        if self.external_port == 0 {
            return Err(UpnpError::InvalidMapping(
                "external port must be 1-65535".into(),
            ));
        }
        if self.internal_port == 0 {
            return Err(UpnpError::InvalidMapping(
                "internal port must be 1-65535".into(),
            ));
        }
        Ok(())
    }

    /// Typed decode of a flattened `GetGenericPortMappingEntry` response.
    ///
    /// Every expected field must be present and parse; anything else is
    /// [`UpnpError::MalformedResponse`] naming the offender.
    pub fn from_soap_fields(fields: &HashMap<String, String>) -> UpnpResult<Self> {
        Ok(PortMapping {
            protocol: require(fields, "NewProtocol")?.parse()?,
            external_port: parse_field(fields, "NewExternalPort")?,
            internal_client: parse_field(fields, "NewInternalClient")?,
            internal_port: parse_field(fields, "NewInternalPort")?,
            description: fields
                .get("NewPortMappingDescription")
                .cloned()
                .unwrap_or_default(),
            lease_duration: parse_field(fields, "NewLeaseDuration")?,
            enabled: require(fields, "NewEnabled")? == "1",
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}:{} ({}, lease {}s)",
            self.protocol,
            self.external_port,
            self.internal_client,
            self.internal_port,
            self.description,
            self.lease_duration
        )
    }
}

/// Key matching a renewal entry to its live mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingIdentity {
    pub protocol: Protocol,
    pub internal_client: Ipv4Addr,
    pub internal_port: u16,
    pub external_port: u16,
}

impl fmt::Display for MappingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} <- {}",
            self.protocol, self.internal_client, self.internal_port, self.external_port
        )
    }
}

fn require<'a>(fields: &'a HashMap<String, String>, name: &str) -> UpnpResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| UpnpError::MalformedResponse(format!("missing field {name}")))
}

fn parse_field<T>(fields: &HashMap<String, String>, name: &str) -> UpnpResult<T>
where
    T: FromStr,
{
    require(fields, name)?
        .parse()
        .map_err(|_| UpnpError::MalformedResponse(format!("unparsable field {name}")))
}
