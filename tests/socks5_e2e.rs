//! End-to-end protocol tests against a live server
//!
//! Each scenario drives real sockets: raw byte sequences for the wire
//! contract, the client library for the higher-level flows.

mod common;

use common::*;
use sockgate::client::Socks5Client;
use sockgate::config::{LimitsConfig, ServerConfig};
use sockgate::server::{NoopObserver, Server};
use sockgate::TargetAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

fn no_auth_config() -> ServerConfig {
    ServerConfig {
        auth_list: vec![0x00],
        ..Default::default()
    }
}

fn password_config() -> ServerConfig {
    ServerConfig {
        user: "alice".to_string(),
        password: "secret".to_string(),
        auth_list: vec![0x02],
        ..Default::default()
    }
}

/// Scenario 1: CONNECT success with no-auth, bytes relayed verbatim.
#[tokio::test]
async fn connect_success_no_auth() {
    let echo_addr = spawn_tcp_echo().await;
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();

    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&echo_addr.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    // Bytes written by either side appear at the other verbatim.
    let payload = (0u16..600).flat_map(|i| i.to_be_bytes()).collect::<Vec<u8>>();
    stream.write_all(&payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

/// Scenario 2: auth required, wrong password is refused with [1, 1].
#[tokio::test]
async fn auth_required_wrong_password() {
    let (proxy_addr, _shutdown) = spawn_server(password_config()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();

    stream.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x02]);

    let mut auth = vec![0x01, 0x05];
    auth.extend_from_slice(b"alice");
    auth.push(0x04);
    auth.extend_from_slice(b"oops");
    stream.write_all(&auth).await.unwrap();

    let mut auth_reply = [0u8; 2];
    stream.read_exact(&mut auth_reply).await.unwrap();
    assert_eq!(auth_reply, [0x01, 0x01]);

    // The session closes after the failure reply.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

/// Scenario 3: no acceptable method gets [5, 0xFF] and zero further
/// bytes.
#[tokio::test]
async fn no_acceptable_method() {
    let config = ServerConfig {
        auth_list: vec![0x02],
        ..Default::default()
    };
    let (proxy_addr, _shutdown) = spawn_server(config).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xFF]);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

/// Scenario 4: an unknown command yields REP 0x07 and the session
/// closes.
#[tokio::test]
async fn unsupported_command() {
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await.unwrap();

    stream
        .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

/// Scenario 5: a domain CONNECT to a refusing port answers REP 0x05.
#[tokio::test]
async fn domain_connect_refused() {
    let dead_port = dead_tcp_port().await;
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    stream.read_exact(&mut method_reply).await.unwrap();

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 9];
    request.extend_from_slice(b"localhost");
    request.extend_from_slice(&dead_port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x05); // connection refused
}

/// Scenario 6: minimal UDP ASSOCIATE over raw sockets, and teardown on
/// control close.
#[tokio::test]
async fn udp_associate_minimal() {
    let echo_addr = spawn_udp_echo().await;
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let mut control = TcpStream::connect(proxy_addr).await.unwrap();
    control.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method_reply = [0u8; 2];
    control.read_exact(&mut method_reply).await.unwrap();

    control
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    control.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    let relay_ip = std::net::Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
    let relay_port = u16::from_be_bytes([reply[8], reply[9]]);
    assert!(!relay_ip.is_unspecified());

    // Encapsulated datagram to the echo target.
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut datagram = vec![0x00, 0x00, 0x00, 0x01, 127, 0, 0, 1];
    datagram.extend_from_slice(&echo_addr.port().to_be_bytes());
    datagram.extend_from_slice(b"dns query");
    socket
        .send_to(&datagram, (relay_ip, relay_port))
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    // Header mirrors the source, payload is the echo.
    assert_eq!(&buf[..4], &[0x00, 0x00, 0x00, 0x01]);
    assert_eq!(&buf[len - 9..len], b"dns query");

    // Closing the TCP control channel tears down the UDP socket.
    drop(control);
    tokio::time::sleep(Duration::from_millis(200)).await;
    socket
        .send_to(&datagram, (relay_ip, relay_port))
        .await
        .unwrap();
    let silence =
        tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
    assert!(silence.is_err(), "relay must be gone after control close");
}

/// The client library drives CONNECT end to end, with authentication.
#[tokio::test]
async fn client_library_connect_with_auth() {
    let echo_addr = spawn_tcp_echo().await;
    let (proxy_addr, _shutdown) = spawn_server(password_config()).await;

    let client = Socks5Client::new(proxy_addr.to_string()).with_credentials("alice", "secret");
    let mut stream = client
        .connect(&echo_addr.ip().to_string(), echo_addr.port())
        .await
        .unwrap();

    stream.write_all(b"authenticated traffic").await.unwrap();
    let mut buf = [0u8; 21];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authenticated traffic");
}

/// The client library drives BIND: first reply exposes the listener,
/// accept returns the peer and the relayed stream.
#[tokio::test]
async fn client_library_bind() {
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let client = Socks5Client::new(proxy_addr.to_string());
    let handle = client.bind("0.0.0.0", 0).await.unwrap();
    let bound = handle.bound_addr().clone();
    assert_ne!(bound.port(), 0);

    // The remote party dials the advertised listener.
    let remote_task = tokio::spawn(async move {
        let mut remote = TcpStream::connect(("127.0.0.1", bound.port())).await.unwrap();
        remote.write_all(b"hello bind").await.unwrap();
        let mut buf = [0u8; 8];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"and back");
    });

    let (peer, mut stream) = handle.accept().await.unwrap();
    assert_ne!(peer.port(), 0);

    let mut buf = [0u8; 10];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello bind");
    stream.write_all(b"and back").await.unwrap();

    remote_task.await.unwrap();
}

/// The client library drives UDP ASSOCIATE through its tunnel handle.
#[tokio::test]
async fn client_library_udp() {
    let echo_addr = spawn_udp_echo().await;
    let (proxy_addr, _shutdown) = spawn_server(no_auth_config()).await;

    let client = Socks5Client::new(proxy_addr.to_string());
    let tunnel = client
        .udp_associate(Some(TargetAddr::from(echo_addr)))
        .await
        .unwrap();

    tunnel.send(b"ping through tunnel").await.unwrap();
    let payload = tokio::time::timeout(Duration::from_secs(5), tunnel.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, b"ping through tunnel");
}

/// The concurrency gauge returns to zero once sessions finish, on both
/// success and failure paths.
#[tokio::test]
async fn session_counter_returns_to_zero() {
    let echo_addr = spawn_tcp_echo().await;
    let server = Arc::new(
        Server::new(no_auth_config())
            .unwrap()
            .with_observer(Arc::new(NoopObserver)),
    );
    let (proxy_addr, _shutdown) = spawn_server_instance(server.clone()).await;

    let client = Socks5Client::new(proxy_addr.to_string());

    // A successful session...
    let mut ok_stream = client
        .connect(&echo_addr.ip().to_string(), echo_addr.port())
        .await
        .unwrap();
    ok_stream.write_all(b"x").await.unwrap();

    // ...and a failing one.
    let mut bad_stream = TcpStream::connect(proxy_addr).await.unwrap();
    bad_stream.write_all(&[0x05, 0x01, 0x63]).await.unwrap();
    let mut reply = [0u8; 2];
    bad_stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xFF]);

    drop(ok_stream);
    drop(bad_stream);

    // Give the session tasks a moment to unwind.
    for _ in 0..50 {
        if server.active_sessions() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.active_sessions(), 0);
}

/// Admission cap: connections beyond max_connections are dropped without
/// any SOCKS5 bytes.
#[tokio::test]
async fn concurrency_cap_drops_silently() {
    let config = ServerConfig {
        limits: LimitsConfig {
            max_connections: 1,
            ..Default::default()
        },
        ..no_auth_config()
    };
    let (proxy_addr, _shutdown) = spawn_server(config).await;

    // Occupy the single slot with a half-open session.
    let mut holder = TcpStream::connect(proxy_addr).await.unwrap();
    holder.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    holder.read_exact(&mut reply).await.unwrap();

    // The next connection is closed with zero bytes.
    let mut rejected = TcpStream::connect(proxy_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), rejected.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

/// Server priority decides the method, not client order.
#[tokio::test]
async fn method_selection_follows_server_priority() {
    let config = ServerConfig {
        user: "alice".to_string(),
        password: "secret".to_string(),
        auth_list: vec![0x02, 0x00],
        ..Default::default()
    };
    let (proxy_addr, _shutdown) = spawn_server(config).await;

    // Client offers no-auth first; the server still picks password.
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x02]);
}

/// Blacklisted destinations are refused pre-resolution with REP 0x02.
#[tokio::test]
async fn blacklisted_destination_refused() {
    let config = ServerConfig {
        blacklist: vec!["blocked.example".to_string()],
        ..no_auth_config()
    };
    let (proxy_addr, _shutdown) = spawn_server(config).await;

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 15];
    request.extend_from_slice(b"blocked.example");
    request.extend_from_slice(&80u16.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut refusal = [0u8; 10];
    stream.read_exact(&mut refusal).await.unwrap();
    assert_eq!(refusal[1], 0x02);
}
