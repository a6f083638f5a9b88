//! End-to-end exercises against an in-process mock gateway: a loopback
//! SSDP responder plus a minimal HTTP/SOAP server backed by a shared
//! mapping table.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use igdctl::{IgdClient, IgdConfig, OutcomeCode, PortMapper, PortMapping, Protocol, UpnpError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum GatewayMode {
    /// Normal IGD behavior
    Normal,
    /// Device description lists no WAN connection service
    NoWanService,
    /// Device description endpoint answers 200 with a non-XML body
    GarbageDescription,
    /// Every AddPortMapping is refused with a SOAP fault
    RejectAdds,
}

#[derive(Clone)]
struct MockGateway {
    table: Arc<Mutex<Vec<PortMapping>>>,
    mode: GatewayMode,
}

/// Stand up the SSDP responder + HTTP server pair and return the SSDP
/// target to point discovery at.
async fn spawn_gateway(gateway: MockGateway) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = listener.local_addr().unwrap();

    let ssdp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ssdp_target = ssdp.local_addr().unwrap().to_string();

    // SSDP responder: answer every probe, discovery re-runs per operation
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((_, from)) = ssdp.recv_from(&mut buf).await {
            let reply = format!(
                "HTTP/1.1 200 OK\r\n\
                 CACHE-CONTROL: max-age=1800\r\n\
                 LOCATION: http://{http_addr}/rootDesc.xml\r\n\
                 ST: upnp:rootdevice\r\n\
                 USN: uuid:mock-igd::upnp:rootdevice\r\n\r\n"
            );
            let _ = ssdp.send_to(reply.as_bytes(), from).await;
        }
    });

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, gateway).await;
            });
        }
    });

    ssdp_target
}

async fn serve_one(mut stream: TcpStream, gateway: MockGateway) -> std::io::Result<()> {
    let (request, body) = read_request(&mut stream).await?;

    let (status, payload) = if request.starts_with("GET /rootDesc.xml") {
        ("200 OK", device_description(gateway.mode))
    } else if request.starts_with("POST /ctl/IPConn") {
        dispatch_soap(&request, &body, &gateway)
    } else {
        ("404 Not Found", String::from("not here"))
    };

    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Read one HTTP request: header block, then Content-Length body bytes
async fn read_request(stream: &mut TcpStream) -> std::io::Result<(String, String)> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = find_header_end(&raw) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let mut body = raw[header_end.min(raw.len())..].to_vec();
    body.drain(..body.len().min(4)); // the \r\n\r\n separator
    while body.len() < content_length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok((head, String::from_utf8_lossy(&body).into_owned()))
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn dispatch_soap(head: &str, body: &str, gateway: &MockGateway) -> (&'static str, String) {
    let action = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("soapaction").then(|| value.trim())
        })
        .unwrap_or("");

    if action.contains("AddPortMapping") {
        if gateway.mode == GatewayMode::RejectAdds {
            return ("500 Internal Server Error", fault_body("718", "ConflictInMappingEntry"));
        }
        let mapping = PortMapping {
            protocol: tag(body, "NewProtocol").unwrap().parse().unwrap(),
            external_port: tag(body, "NewExternalPort").unwrap().parse().unwrap(),
            internal_client: tag(body, "NewInternalClient").unwrap().parse().unwrap(),
            internal_port: tag(body, "NewInternalPort").unwrap().parse().unwrap(),
            description: tag(body, "NewPortMappingDescription").unwrap_or_default(),
            lease_duration: tag(body, "NewLeaseDuration").unwrap().parse().unwrap(),
            enabled: tag(body, "NewEnabled").as_deref() == Some("1"),
        };
        let mut table = gateway.table.lock();
        table.retain(|m| {
            !(m.external_port == mapping.external_port && m.protocol == mapping.protocol)
        });
        table.push(mapping);
        ("200 OK", ack_body("AddPortMappingResponse"))
    } else if action.contains("DeletePortMapping") {
        let port: u16 = tag(body, "NewExternalPort").unwrap().parse().unwrap();
        let protocol: Protocol = tag(body, "NewProtocol").unwrap().parse().unwrap();
        let mut table = gateway.table.lock();
        let before = table.len();
        table.retain(|m| !(m.external_port == port && m.protocol == protocol));
        if table.len() == before {
            ("500 Internal Server Error", fault_body("714", "NoSuchEntryInArray"))
        } else {
            ("200 OK", ack_body("DeletePortMappingResponse"))
        }
    } else if action.contains("GetGenericPortMappingEntry") {
        let index: usize = tag(body, "NewPortMappingIndex").unwrap().parse().unwrap();
        let table = gateway.table.lock();
        match table.get(index) {
            Some(m) => ("200 OK", entry_body(m)),
            None => ("500 Internal Server Error", fault_body("713", "SpecifiedArrayIndexInvalid")),
        }
    } else if action.contains("GetExternalIPAddress") {
        (
            "200 OK",
            soap_response(
                "GetExternalIPAddressResponse",
                "<NewExternalIPAddress>203.0.113.7</NewExternalIPAddress>",
            ),
        )
    } else {
        ("500 Internal Server Error", fault_body("401", "Invalid Action"))
    }
}

fn tag(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

fn soap_response(element: &str, inner: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body><u:{element} xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">{inner}</u:{element}></s:Body>
</s:Envelope>"#
    )
}

fn ack_body(element: &str) -> String {
    soap_response(element, "")
}

fn fault_body(code: &str, description: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body><s:Fault>
<faultcode>s:Client</faultcode>
<faultstring>UPnPError</faultstring>
<detail><UPnPError><errorCode>{code}</errorCode><errorDescription>{description}</errorDescription></UPnPError></detail>
</s:Fault></s:Body>
</s:Envelope>"#
    )
}

fn entry_body(m: &PortMapping) -> String {
    soap_response(
        "GetGenericPortMappingEntryResponse",
        &format!(
            "<NewRemoteHost></NewRemoteHost>\
             <NewExternalPort>{}</NewExternalPort>\
             <NewProtocol>{}</NewProtocol>\
             <NewInternalPort>{}</NewInternalPort>\
             <NewInternalClient>{}</NewInternalClient>\
             <NewEnabled>{}</NewEnabled>\
             <NewPortMappingDescription>{}</NewPortMappingDescription>\
             <NewLeaseDuration>{}</NewLeaseDuration>",
            m.external_port,
            m.protocol,
            m.internal_port,
            m.internal_client,
            if m.enabled { "1" } else { "0" },
            m.description,
            m.lease_duration
        ),
    )
}

fn device_description(mode: GatewayMode) -> String {
    if mode == GatewayMode::GarbageDescription {
        return String::from("this is not an xml document");
    }
    let service = match mode {
        GatewayMode::NoWanService => "",
        _ => {
            "<service>\
             <serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>\
             <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>\
             <controlURL>/ctl/IPConn</controlURL>\
             </service>"
        }
    };
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<device>
<deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
<friendlyName>mock router</friendlyName>
<deviceList><device>
<deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
<deviceList><device>
<deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
<serviceList>{service}</serviceList>
</device></deviceList>
</device></deviceList>
</device>
</root>"#
    )
}

fn test_client(ssdp_target: String) -> IgdClient {
    IgdClient::new(IgdConfig {
        ssdp_target,
        discovery_window: Duration::from_millis(200),
    })
}

fn sample_mapping(port: u16) -> PortMapping {
    PortMapping {
        protocol: Protocol::Tcp,
        external_port: port,
        internal_client: Ipv4Addr::new(192, 168, 1, 50),
        internal_port: port,
        description: "mock test".into(),
        lease_duration: 3600,
        enabled: true,
    }
}

#[tokio::test]
async fn add_then_list_contains_the_mapping() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::Normal,
    };
    let target = spawn_gateway(gateway).await;
    let mapper = PortMapper::new(test_client(target));

    let mapping = sample_mapping(12345);
    let outcome = mapper.add_mapping(mapping.clone(), false).await;
    assert!(outcome.is_success(), "add failed: {}", outcome.detail);

    let mappings = mapper.discover_and_list_mappings().await.unwrap();
    assert!(mappings.iter().any(|m| m.identity() == mapping.identity()));
}

#[tokio::test]
async fn remove_then_list_no_longer_contains_it() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(vec![sample_mapping(5000), sample_mapping(6000)])),
        mode: GatewayMode::Normal,
    };
    let target = spawn_gateway(gateway).await;
    let mapper = PortMapper::new(test_client(target));

    let outcome = mapper.remove_mapping(5000, Protocol::Tcp).await;
    assert!(outcome.is_success(), "remove failed: {}", outcome.detail);

    let mappings = mapper.discover_and_list_mappings().await.unwrap();
    assert!(!mappings
        .iter()
        .any(|m| m.external_port == 5000 && m.protocol == Protocol::Tcp));
    assert!(mappings.iter().any(|m| m.external_port == 6000));
}

#[tokio::test]
async fn enumeration_terminates_at_table_end() {
    let table: Vec<PortMapping> = (0..5).map(|i| sample_mapping(7000 + i)).collect();
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(table)),
        mode: GatewayMode::Normal,
    };
    let target = spawn_gateway(gateway).await;
    let client = test_client(target);

    let mappings = client.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 5);
    assert_eq!(mappings[0].external_port, 7000);
    assert_eq!(mappings[4].external_port, 7004);
}

#[tokio::test]
async fn rejected_add_surfaces_code_two_with_fault_body() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::RejectAdds,
    };
    let target = spawn_gateway(gateway).await;
    let mapper = PortMapper::new(test_client(target));

    let outcome = mapper.add_mapping(sample_mapping(12345), false).await;
    assert_eq!(outcome.code, OutcomeCode::ActionRejected);
    assert!(outcome.detail.contains("ConflictInMappingEntry"));
}

#[tokio::test]
async fn silent_network_means_gateway_not_found() {
    // A bound socket that never answers stands in for an empty segment
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = sink.local_addr().unwrap().to_string();
    let mapper = PortMapper::new(test_client(target));

    let outcome = mapper.add_mapping(sample_mapping(12345), false).await;
    assert_eq!(outcome.code, OutcomeCode::GatewayNotFound);
}

#[tokio::test]
async fn device_without_wan_service_is_distinct_from_no_gateway() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::NoWanService,
    };
    let target = spawn_gateway(gateway).await;
    let client = test_client(target);

    let err = client.list_mappings().await.unwrap_err();
    assert!(matches!(err, UpnpError::NoCompatibleService { .. }));
}

#[tokio::test]
async fn non_xml_description_is_a_malformed_response() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::GarbageDescription,
    };
    let target = spawn_gateway(gateway).await;
    let client = test_client(target);

    let err = client.list_mappings().await.unwrap_err();
    assert!(matches!(err, UpnpError::MalformedResponse(_)));
}

#[tokio::test]
async fn http_error_fetching_description_is_a_transport_error() {
    // SSDP advertises a path the description server answers 404 to
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::Normal,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, gateway).await;
            });
        }
    });

    let ssdp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = ssdp.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((_, from)) = ssdp.recv_from(&mut buf).await {
            let reply = format!(
                "HTTP/1.1 200 OK\r\nLOCATION: http://{http_addr}/missing.xml\r\nST: upnp:rootdevice\r\n\r\n"
            );
            let _ = ssdp.send_to(reply.as_bytes(), from).await;
        }
    });

    let client = test_client(target);
    let err = client.list_mappings().await.unwrap_err();
    assert!(
        matches!(err, UpnpError::Transport(_)),
        "expected Transport, got {err:?}"
    );
}

#[tokio::test]
async fn dead_description_server_is_a_transport_error() {
    // SSDP answers, but the advertised LOCATION has no listener
    let ssdp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = ssdp.local_addr().unwrap().to_string();
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((_, from)) = ssdp.recv_from(&mut buf).await {
            let reply = format!(
                "HTTP/1.1 200 OK\r\nLOCATION: http://{dead_addr}/rootDesc.xml\r\nST: upnp:rootdevice\r\n\r\n"
            );
            let _ = ssdp.send_to(reply.as_bytes(), from).await;
        }
    });

    let client = test_client(target);
    let err = client.list_mappings().await.unwrap_err();
    assert!(matches!(err, UpnpError::Transport(_)));
}

#[tokio::test]
async fn external_ip_round_trip() {
    let gateway = MockGateway {
        table: Arc::new(Mutex::new(Vec::new())),
        mode: GatewayMode::Normal,
    };
    let target = spawn_gateway(gateway).await;
    let client = test_client(target);

    let ip = client.external_ip().await.unwrap();
    assert_eq!(ip, Ipv4Addr::new(203, 0, 113, 7));
}
