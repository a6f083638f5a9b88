//! Best-effort lookup of the local machine's LAN IPv4 address, used to
//! pre-fill the internal-client side of a new mapping.

use std::net::Ipv4Addr;

/// Returned when no usable interface can be found; matches the address
/// most home LANs would hand out so the pre-filled form is at least
/// plausible.
pub const FALLBACK_LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

/// First non-loopback IPv4 address of this host, or
/// [`FALLBACK_LOCAL_IP`] when interface enumeration fails or finds
/// nothing. Never errors — this is a suggestion, not a requirement.
pub fn local_ipv4() -> Ipv4Addr {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .find_map(|iface| match iface.ip() {
                std::net::IpAddr::V4(ip) => Some(ip),
                std::net::IpAddr::V6(_) => None,
            })
            .unwrap_or(FALLBACK_LOCAL_IP),
        Err(e) => {
            tracing::warn!("interface enumeration failed, using fallback: {e}");
            FALLBACK_LOCAL_IP
        }
    }
}
