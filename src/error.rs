use std::io;
use thiserror::Error;

/// Error taxonomy for gateway discovery, control and renewal.
///
/// The split between [`UpnpError::NoGatewayFound`] and
/// [`UpnpError::NoCompatibleService`] is deliberate: the first means
/// nothing answered the SSDP probe, the second means a device answered
/// but its description exposes no WAN connection service. Callers
/// surface them as distinct failure reasons.
#[derive(Debug, Error)]
pub enum UpnpError {
    /// SSDP discovery produced no response carrying a LOCATION header
    #[error("no UPnP gateway responded to discovery")]
    NoGatewayFound,

    /// Device description parsed but no WANIPConnection/WANPPPConnection service
    #[error("gateway at {location} exposes no WAN connection service")]
    NoCompatibleService { location: String },

    /// HTTP failure reaching the description or control endpoint
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Socket-level failure during discovery
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Control endpoint answered a SOAP action with a non-success status.
    /// `body` is the raw response body; gateways are not required to put
    /// well-formed SOAP in fault bodies, so it is carried verbatim.
    #[error("gateway rejected {action} with HTTP {status}")]
    ActionRejected {
        action: String,
        status: u16,
        body: String,
    },

    /// XML body did not parse, or an expected field was missing/unparsable
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),

    /// Mapping arguments failed validation; reported before any
    /// network action is attempted
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    /// Renewal requested with a lease too short to renew safely
    /// (see [`crate::renew::MIN_RENEWAL_LEASE_SECS`]). Reported before
    /// any network action is attempted.
    #[error("lease duration {0}s is too short to renew safely")]
    LeaseTooShort(u32),
}

pub type UpnpResult<T> = Result<T, UpnpError>;

impl UpnpError {
    /// True when the failure means "no usable gateway", as opposed to a
    /// gateway that was reached and said no.
    pub fn is_gateway_missing(&self) -> bool {
        matches!(
            self,
            UpnpError::NoGatewayFound | UpnpError::NoCompatibleService { .. }
        )
    }
}
