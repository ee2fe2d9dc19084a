use robofleet::error::TransportError;
use robofleet::transport::{Transport, UdpTransport};
use robofleet::{FleetConfig, FleetCore};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(2);

async fn bind_transport() -> UdpTransport {
    UdpTransport::bind(SocketAddr::new(LOOPBACK, 0), Ipv4Addr::LOCALHOST)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unicast_reaches_peer() {
    let transport = bind_transport().await;
    let peer = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    transport.send_unicast(LOOPBACK, peer_port, b"minibot-a:teleop").unwrap();

    let mut buffer = [0u8; 64];
    let (len, source) = timeout(WAIT, peer.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"minibot-a:teleop");
    assert_eq!(source, transport.local_addr().unwrap());
}

#[tokio::test]
async fn test_broadcast_uses_configured_address() {
    // Broadcast address pointed at loopback so the test needs no real subnet.
    let transport = bind_transport().await;
    let peer = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    transport.send_broadcast(peer_port, b"ESTOP").unwrap();

    let mut buffer = [0u8; 64];
    let (len, _) = timeout(WAIT, peer.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"ESTOP");
}

#[tokio::test]
async fn test_subscription_delivers_in_arrival_order() {
    let transport = bind_transport().await;
    let mut inbound = transport.subscribe();
    let station = transport.local_addr().unwrap();

    let peer = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    for payload in [&b"pong:minibot-a"[..], b"pong:minibot-b", b"pong:minibot-c"] {
        peer.send_to(payload, station).await.unwrap();
    }

    let peer_addr = peer.local_addr().unwrap();
    for expected in [&b"pong:minibot-a"[..], b"pong:minibot-b", b"pong:minibot-c"] {
        let datagram = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(datagram.payload, expected);
        assert_eq!(datagram.source, peer_addr);
    }
}

#[tokio::test]
async fn test_closed_transport_refuses_sends() {
    let transport = bind_transport().await;
    let mut inbound = transport.subscribe();

    transport.close();

    assert!(matches!(
        transport.send_unicast(LOOPBACK, 9, b"ping"),
        Err(TransportError::Closed)
    ));
    assert!(matches!(transport.send_broadcast(9, b"ping"), Err(TransportError::Closed)));
    // Receive loop is gone, so the channel ends.
    assert!(timeout(WAIT, inbound.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bind_failure_is_init_error() {
    let first = bind_transport().await;
    let taken = first.local_addr().unwrap();

    let result = UdpTransport::bind(taken, Ipv4Addr::LOCALHOST).await;
    assert!(matches!(result, Err(TransportError::Init { .. })));
}

#[tokio::test(flavor = "current_thread")]
async fn test_estop_sends_immediately_after_bind() {
    let peer = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();

    // No await between bind and send: the reactor has not polled the socket yet.
    let transport = bind_transport().await;
    transport.send_broadcast(peer_port, b"ESTOP").unwrap();
    transport.send_unicast(LOOPBACK, peer_port, b"ESTOP_OFF").unwrap();

    let mut buffer = [0u8; 64];
    let (len, _) = timeout(WAIT, peer.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"ESTOP");
    let (len, _) = timeout(WAIT, peer.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"ESTOP_OFF");
}

#[tokio::test(flavor = "current_thread")]
async fn test_override_delivered_over_fresh_udp_transport() {
    let peer = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    let config = FleetConfig {
        broadcast_addr: Ipv4Addr::LOCALHOST,
        robot_port: peer.local_addr().unwrap().port(),
        ..FleetConfig::default()
    };
    let transport = Arc::new(bind_transport().await);
    let mut core = FleetCore::new(transport, &config);

    core.set_override(true, 0).unwrap();
    assert!(core.override_active());

    let mut buffer = [0u8; 64];
    let (len, _) = timeout(WAIT, peer.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"ESTOP");
}
