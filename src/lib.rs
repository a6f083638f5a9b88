//! igdctl — UPnP IGD port-mapping client with automatic lease renewal.
//!
//! Discovers an Internet Gateway Device over SSDP, resolves its WAN
//! connection control endpoint, and manages NAT port mappings on it
//! (create, enumerate, delete). Long-lived mappings can be kept alive
//! by the renewal scheduler, which re-issues them at half their lease
//! lifetime until cancelled or a renewal fails.

#![warn(clippy::all)]

pub mod client;
pub mod describe;
pub mod error;
pub mod mapping;
pub mod netinfo;
pub mod renew;
pub mod soap;
pub mod ssdp;

// Re-export the surface outer applications consume
pub use client::{ActionOutcome, IgdClient, IgdConfig, OutcomeCode, PortMapper};
pub use describe::GatewayEndpoint;
pub use error::{UpnpError, UpnpResult};
pub use mapping::{MappingIdentity, PortMapping, Protocol};
pub use renew::{LeaseRefresher, RenewalEvent, RenewalScheduler, MIN_RENEWAL_LEASE_SECS};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the given default level.
///
/// `RUST_LOG` wins when set; dependency chatter is dialed down.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("tokio=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
