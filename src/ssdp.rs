//! SSDP multicast discovery of Internet Gateway Devices.
//!
//! One M-SEARCH probe, then every response received inside the timeout
//! window is parsed as an HTTP-style header block. When several devices
//! answer, later responses overwrite earlier keys — callers must not
//! assume a specific gateway wins on a multi-gateway segment.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

/// SSDP multicast group for UPnP discovery
pub const SSDP_MULTICAST: &str = "239.255.255.250:1900";

/// Discovery window matching the advertised MX value plus slack
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
                        HOST: 239.255.255.250:1900\r\n\
                        ST: upnp:rootdevice\r\n\
                        MX: 2\r\n\
                        MAN: \"ssdp:discover\"\r\n\
                        \r\n";

/// Send one M-SEARCH probe and collect response headers until the
/// window closes.
///
/// Returns an empty map when nothing answers — absence of a `LOCATION`
/// key is the caller's signal that no gateway was found.
pub async fn discover(window: Duration) -> io::Result<HashMap<String, String>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    discover_on(&socket, SSDP_MULTICAST, window).await
}

/// Probe loop against an explicit target. Split out from [`discover`]
/// so tests can drive it over loopback.
pub(crate) async fn discover_on(
    socket: &UdpSocket,
    target: &str,
    window: Duration,
) -> io::Result<HashMap<String, String>> {
    socket.send_to(M_SEARCH.as_bytes(), target).await?;

    let mut headers = HashMap::new();
    let mut buf = vec![0u8; 8192];
    let deadline = Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let response = String::from_utf8_lossy(&buf[..len]);
                tracing::debug!("SSDP response from {from} ({len} bytes)");
                parse_header_block(&response, &mut headers);
            }
            Ok(Err(e)) => return Err(e),
            // Window closed
            Err(_) => break,
        }
    }

    if headers.is_empty() {
        tracing::debug!("SSDP discovery window closed with no responders");
    }
    Ok(headers)
}

/// Parse `Key: Value` lines into the accumulator. The first colon is
/// the separator, both sides trimmed; lines without a colon (like the
/// status line) are skipped. Later values overwrite earlier ones.
fn parse_header_block(block: &str, into: &mut HashMap<String, String>) {
    for line in block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            into.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

/// Case-insensitive header lookup; SSDP implementations disagree on
/// `LOCATION` vs `Location`.
pub fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
