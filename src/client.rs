//! Client facade over discovery, resolution and SOAP control, plus the
//! outer-application surface with numeric outcome codes.
//!
//! Every top-level operation resolves the gateway exactly once and
//! never caches the result; a router that moved between calls is
//! picked up by the next operation's fresh resolution.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::describe::{self, GatewayEndpoint};
use crate::error::{UpnpError, UpnpResult};
use crate::mapping::{MappingIdentity, PortMapping, Protocol};
use crate::renew::{LeaseRefresher, RenewalEvent, RenewalScheduler, MIN_RENEWAL_LEASE_SECS};
use crate::soap;
use crate::ssdp;

/// Knobs for gateway discovery. The SSDP target is configurable so
/// tests can stand up a loopback gateway; production uses the default.
#[derive(Debug, Clone)]
pub struct IgdConfig {
    pub ssdp_target: String,
    pub discovery_window: Duration,
}

impl Default for IgdConfig {
    fn default() -> Self {
        Self {
            ssdp_target: ssdp::SSDP_MULTICAST.to_string(),
            discovery_window: ssdp::DEFAULT_DISCOVERY_WINDOW,
        }
    }
}

/// Stateless IGD control client. Cheap to clone; holds only the HTTP
/// client and discovery settings.
#[derive(Debug, Clone)]
pub struct IgdClient {
    http: reqwest::Client,
    config: IgdConfig,
}

impl Default for IgdClient {
    fn default() -> Self {
        Self::new(IgdConfig::default())
    }
}

impl IgdClient {
    pub fn new(config: IgdConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Raw SSDP discovery: header map of the response burst, empty when
    /// nothing answered.
    pub async fn discover(&self) -> UpnpResult<HashMap<String, String>> {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        Ok(ssdp::discover_on(&socket, &self.config.ssdp_target, self.config.discovery_window).await?)
    }

    /// One discovery + description round, producing the control target
    /// for this operation. `NoGatewayFound` when nothing answered or
    /// the answer carried no LOCATION; `NoCompatibleService` when the
    /// description lists no WAN connection service.
    pub async fn resolve_endpoint(&self) -> UpnpResult<GatewayEndpoint> {
        let headers = self.discover().await?;
        let location = ssdp::header(&headers, "LOCATION")
            .ok_or(UpnpError::NoGatewayFound)?
            .to_string();
        let control_path = describe::resolve_control_path(&self.http, &location).await?;
        tracing::debug!("resolved gateway: {location} -> {control_path}");
        Ok(GatewayEndpoint {
            location,
            control_path,
        })
    }

    /// Walk the gateway's mapping table: `GetGenericPortMappingEntry`
    /// for index 0, 1, 2, … until the gateway answers non-success (the
    /// UPnP convention for "index out of range"). A finite snapshot;
    /// transport faults and unparsable entries are errors, not
    /// termination.
    pub async fn list_mappings(&self) -> UpnpResult<Vec<PortMapping>> {
        let endpoint = self.resolve_endpoint().await?;
        let control_url = endpoint.control_url()?;
        let mut mappings = Vec::new();

        for index in 0u32.. {
            let result = soap::invoke(
                &self.http,
                &control_url,
                soap::ACTION_GET_GENERIC_ENTRY,
                &[("NewPortMappingIndex", index.to_string())],
            )
            .await;

            match result {
                Ok(fields) => mappings.push(PortMapping::from_soap_fields(&fields)?),
                // End of table
                Err(UpnpError::ActionRejected { status, .. }) => {
                    tracing::debug!("mapping table ends at index {index} (HTTP {status})");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("enumerated {} mapping(s)", mappings.len());
        Ok(mappings)
    }

    /// Create (or refresh — UPnP treats re-adding as a refresh) a port
    /// mapping on the gateway.
    pub async fn add_mapping(&self, mapping: &PortMapping) -> UpnpResult<()> {
        mapping.validate()?;
        let endpoint = self.resolve_endpoint().await?;
        let control_url = endpoint.control_url()?;
        soap::invoke(
            &self.http,
            &control_url,
            soap::ACTION_ADD_PORT_MAPPING,
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", mapping.external_port.to_string()),
                ("NewProtocol", mapping.protocol.as_str().to_string()),
                ("NewInternalPort", mapping.internal_port.to_string()),
                ("NewInternalClient", mapping.internal_client.to_string()),
                ("NewEnabled", if mapping.enabled { "1" } else { "0" }.to_string()),
                ("NewPortMappingDescription", mapping.description.clone()),
                ("NewLeaseDuration", mapping.lease_duration.to_string()),
            ],
        )
        .await?;
        tracing::info!("added mapping {mapping}");
        Ok(())
    }

    /// Delete the mapping identified by (external port, protocol)
    pub async fn remove_mapping(&self, external_port: u16, protocol: Protocol) -> UpnpResult<()> {
        if external_port == 0 {
            return Err(UpnpError::InvalidMapping(
                "external port must be 1-65535".into(),
            ));
        }
        let endpoint = self.resolve_endpoint().await?;
        let control_url = endpoint.control_url()?;
        soap::invoke(
            &self.http,
            &control_url,
            soap::ACTION_DELETE_PORT_MAPPING,
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", external_port.to_string()),
                ("NewProtocol", protocol.as_str().to_string()),
            ],
        )
        .await?;
        tracing::info!("removed mapping {protocol} {external_port}");
        Ok(())
    }

    /// The gateway's WAN-side address, per `GetExternalIPAddress`
    pub async fn external_ip(&self) -> UpnpResult<Ipv4Addr> {
        let endpoint = self.resolve_endpoint().await?;
        let control_url = endpoint.control_url()?;
        let fields = soap::invoke(&self.http, &control_url, soap::ACTION_GET_EXTERNAL_IP, &[])
            .await?;
        fields
            .get("NewExternalIPAddress")
            .and_then(|ip| ip.parse().ok())
            .ok_or_else(|| {
                UpnpError::MalformedResponse("missing or unparsable NewExternalIPAddress".into())
            })
    }
}

impl LeaseRefresher for IgdClient {
    /// A renewal fire is a full top-level operation: fresh discovery
    /// and resolution, then `AddPortMapping` with identical arguments.
    async fn refresh(&self, mapping: &PortMapping) -> UpnpResult<()> {
        self.add_mapping(mapping).await
    }
}

/// Numeric result codes handed to the outer application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum OutcomeCode {
    Success = 0,
    GatewayNotFound = 1,
    ActionRejected = 2,
}

/// Result of a mutating operation: a code plus a human-readable detail
/// string (the raw SOAP/HTTP body when the gateway rejected the action).
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub code: OutcomeCode,
    pub detail: String,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.code == OutcomeCode::Success
    }

    fn success(detail: impl Into<String>) -> Self {
        Self {
            code: OutcomeCode::Success,
            detail: detail.into(),
        }
    }

    fn from_error(err: UpnpError) -> Self {
        let code = if err.is_gateway_missing() {
            OutcomeCode::GatewayNotFound
        } else {
            OutcomeCode::ActionRejected
        };
        let detail = match err {
            // Hand the raw body through; callers decide how to render it
            UpnpError::ActionRejected { body, .. } if !body.is_empty() => body,
            other => other.to_string(),
        };
        Self { code, detail }
    }
}

/// The outer-application surface: gateway operations plus the renewal
/// scheduler, one object. The display layer (CLI, UI, log sink) only
/// ever talks to this.
pub struct PortMapper {
    client: IgdClient,
    scheduler: RenewalScheduler,
}

impl PortMapper {
    pub fn new(client: IgdClient) -> Self {
        let scheduler = RenewalScheduler::spawn(client.clone());
        Self { client, scheduler }
    }

    /// Fresh discovery + enumeration snapshot
    pub async fn discover_and_list_mappings(&self) -> UpnpResult<Vec<PortMapping>> {
        self.client.list_mappings().await
    }

    /// Create a mapping; with `renew` the mapping is also registered
    /// for automatic lease renewal. A lease below the renewal minimum
    /// is rejected before any network traffic when `renew` is set.
    pub async fn add_mapping(&self, mapping: PortMapping, renew: bool) -> ActionOutcome {
        if renew && mapping.lease_duration < MIN_RENEWAL_LEASE_SECS {
            return ActionOutcome::from_error(UpnpError::LeaseTooShort(mapping.lease_duration));
        }
        match self.client.add_mapping(&mapping).await {
            Ok(()) => {
                if renew {
                    // Lease already validated above
                    let _ = self.scheduler.register(mapping.clone());
                }
                ActionOutcome::success(format!("mapping added: {mapping}"))
            }
            Err(e) => ActionOutcome::from_error(e),
        }
    }

    pub async fn remove_mapping(&self, external_port: u16, protocol: Protocol) -> ActionOutcome {
        match self.client.remove_mapping(external_port, protocol).await {
            Ok(()) => ActionOutcome::success(format!("mapping removed: {protocol} {external_port}")),
            Err(e) => ActionOutcome::from_error(e),
        }
    }

    /// Register an already-existing mapping (e.g. one the user toggled
    /// on from an enumerated list) for renewal.
    pub fn register_renewal(&self, mapping: PortMapping) -> UpnpResult<()> {
        self.scheduler.register(mapping)
    }

    /// Cooperative cancel: the entry is dropped at its next fire
    pub fn cancel_renewal(&self, identity: &MappingIdentity) {
        self.scheduler.cancel(identity);
    }

    pub fn is_renewing(&self, identity: &MappingIdentity) -> bool {
        self.scheduler.is_registered(identity)
    }

    /// Renewal outcome events; `None` after the first call
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<RenewalEvent>> {
        self.scheduler.take_events()
    }

    pub async fn external_ip(&self) -> UpnpResult<Ipv4Addr> {
        self.client.external_ip().await
    }

    pub async fn discover(&self) -> UpnpResult<HashMap<String, String>> {
        self.client.discover().await
    }
}
