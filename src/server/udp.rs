//! UDP ASSOCIATE command handler
//!
//! Allocates a UDP relay socket and keeps it alive for exactly as long
//! as the TCP control connection. Client datagrams are decapsulated and
//! forwarded to their destinations; target replies are wrapped in the
//! datagram header and sent back to the client.

use super::reply::{send_error_reply, send_success};
use crate::config::TimeoutConfig;
use crate::error::{ReplyCode, SocksError};
use crate::socks::codec::UdpHeader;
use crate::socks::consts::MAX_UDP_PACKET;
use crate::socks::TargetAddr;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Handle a UDP ASSOCIATE request on an already-negotiated session.
///
/// `advertise_ip` is the address the reply carries when the relay socket
/// is bound to a wildcard: clients must be given an address they can
/// actually send to, so the server substitutes the address the control
/// connection reached it on.
pub(crate) async fn handle<S>(
    mut control: S,
    control_peer: SocketAddr,
    advertise_ip: IpAddr,
    bind_host: &str,
    restrict_source: bool,
    timeouts: &TimeoutConfig,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let socket = match UdpSocket::bind((bind_host, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(error = %e, "UDP relay socket allocation failed");
            send_error_reply(&mut control, ReplyCode::GeneralFailure, timeouts.reply()).await;
            return Err(e.into());
        }
    };

    let local = socket.local_addr()?;
    let advertised = if local.ip().is_unspecified() {
        SocketAddr::new(advertise_ip, local.port())
    } else {
        local
    };
    send_success(&mut control, advertised, timeouts.reply()).await?;
    info!(relay = %advertised, peer = %control_peer, "UDP association established");

    relay_loop(&mut control, &socket, control_peer, restrict_source).await;

    info!(relay = %advertised, "UDP association closed");
    Ok(())
}

/// Pump datagrams until the control connection closes.
///
/// One socket serves both directions, so a single loop plays both pumps:
/// the source address decides whether a datagram is client traffic to
/// decapsulate or a target reply to wrap. The routing table maps each
/// contacted target back to the client peer and dies with the
/// association.
async fn relay_loop<S>(
    control: &mut S,
    socket: &UdpSocket,
    control_peer: SocketAddr,
    restrict_source: bool,
) where
    S: AsyncRead + Unpin,
{
    let mut routes: HashMap<SocketAddr, SocketAddr> = HashMap::new();
    let mut client_peer: Option<SocketAddr> = None;
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    let mut control_buf = [0u8; 512];

    loop {
        tokio::select! {
            read = control.read(&mut control_buf) => {
                match read {
                    Ok(0) => {
                        debug!("control connection closed, tearing down UDP relay");
                        break;
                    }
                    Ok(_) => {
                        // RFC 1928 defines no payload on the control
                        // connection after the reply; ignore stray bytes.
                        continue;
                    }
                    Err(e) => {
                        debug!(error = %e, "control connection error, tearing down UDP relay");
                        break;
                    }
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "UDP recv failed");
                        continue;
                    }
                };

                if client_peer == Some(src) {
                    forward_to_target(socket, &buf[..len], src, &mut routes).await;
                } else if let Some(&client) = routes.get(&src) {
                    forward_to_client(socket, &buf[..len], src, client).await;
                } else if client_peer.is_none() {
                    // First datagram from the client establishes its peer
                    // address; its source port is not knowable in advance.
                    if restrict_source && src.ip() != control_peer.ip() {
                        debug!(%src, "dropping datagram from foreign source");
                        continue;
                    }
                    if forward_to_target(socket, &buf[..len], src, &mut routes).await {
                        client_peer = Some(src);
                    }
                } else {
                    debug!(%src, "dropping datagram from unknown peer");
                }
            }
        }
    }
}

/// Decapsulate a client datagram and forward the payload to its
/// destination. Returns whether the datagram was forwarded.
async fn forward_to_target(
    socket: &UdpSocket,
    datagram: &[u8],
    client: SocketAddr,
    routes: &mut HashMap<SocketAddr, SocketAddr>,
) -> bool {
    let (header, header_len) = match UdpHeader::decode(datagram) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "dropping malformed UDP datagram");
            return false;
        }
    };
    if header.frag != 0 {
        debug!(frag = header.frag, "dropping fragmented UDP datagram");
        return false;
    }

    let target = match header.addr.resolve().await {
        Ok(addr) => addr,
        Err(e) => {
            debug!(addr = %header.addr, error = %e, "dropping datagram for unresolvable target");
            return false;
        }
    };

    match socket.send_to(&datagram[header_len..], target).await {
        Ok(sent) => {
            debug!(bytes = sent, %target, "UDP forwarded to target");
            routes.insert(target, client);
            true
        }
        Err(e) => {
            warn!(%target, error = %e, "UDP send to target failed");
            false
        }
    }
}

/// Wrap a target reply in the datagram header and send it to the client
async fn forward_to_client(
    socket: &UdpSocket,
    payload: &[u8],
    target: SocketAddr,
    client: SocketAddr,
) {
    let datagram = UdpHeader::new(TargetAddr::from(target)).encode_datagram(payload);
    match socket.send_to(&datagram, client).await {
        Ok(_) => debug!(bytes = payload.len(), %target, %client, "UDP forwarded to client"),
        Err(e) => warn!(%client, error = %e, "UDP send to client failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::codec::Reply;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    async fn spawn_udp_echo() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_UDP_PACKET];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..len], from).await;
            }
        });
        addr
    }

    async fn start_association(
        restrict_source: bool,
    ) -> (tokio::io::DuplexStream, SocketAddr, tokio::task::JoinHandle<Result<(), SocksError>>) {
        let (mut client, server) = duplex(4096);
        let control_peer: SocketAddr = "127.0.0.1:39000".parse().unwrap();
        let task = tokio::spawn(async move {
            handle(
                server,
                control_peer,
                "127.0.0.1".parse().unwrap(),
                "127.0.0.1",
                restrict_source,
                &TimeoutConfig::default(),
            )
            .await
        });

        let mut frame = [0u8; 10];
        client.read_exact(&mut frame).await.unwrap();
        let (reply, _) = Reply::decode(&frame).unwrap();
        assert_eq!(reply.status, 0x00);
        let relay_addr = match reply.addr {
            TargetAddr::Ip(addr) => addr,
            other => panic!("unexpected reply address {}", other),
        };
        assert!(!relay_addr.ip().is_unspecified());

        (client, relay_addr, task)
    }

    #[tokio::test]
    async fn test_udp_relay_round_trip() {
        let echo_addr = spawn_udp_echo().await;
        let (control, relay_addr, relay_task) = start_association(false).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = UdpHeader::new(TargetAddr::from(echo_addr)).encode_datagram(b"dns query");
        client_socket.send_to(&request, relay_addr).await.unwrap();

        let mut buf = [0u8; MAX_UDP_PACKET];
        let (len, from) = tokio::time::timeout(
            Duration::from_secs(5),
            client_socket.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(from, relay_addr);

        let (header, header_len) = UdpHeader::decode(&buf[..len]).unwrap();
        assert_eq!(header.frag, 0);
        assert_eq!(header.addr, TargetAddr::from(echo_addr));
        assert_eq!(&buf[header_len..len], b"dns query");

        // Closing the control connection tears the relay down.
        drop(control);
        tokio::time::timeout(Duration::from_secs(5), relay_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_udp_relay_drops_fragments() {
        let echo_addr = spawn_udp_echo().await;
        let (_control, relay_addr, _task) = start_association(false).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut fragmented = UdpHeader::new(TargetAddr::from(echo_addr));
        fragmented.frag = 1;
        client_socket
            .send_to(&fragmented.encode_datagram(b"dropped"), relay_addr)
            .await
            .unwrap();

        // A well-formed datagram afterwards still goes through, proving
        // the fragment was dropped rather than wedging the relay.
        let request = UdpHeader::new(TargetAddr::from(echo_addr)).encode_datagram(b"kept");
        client_socket.send_to(&request, relay_addr).await.unwrap();

        let mut buf = [0u8; MAX_UDP_PACKET];
        let (len, _) = tokio::time::timeout(
            Duration::from_secs(5),
            client_socket.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let (_, header_len) = UdpHeader::decode(&buf[..len]).unwrap();
        assert_eq!(&buf[header_len..len], b"kept");
    }

    #[tokio::test]
    async fn test_udp_relay_drops_malformed_datagrams() {
        let echo_addr = spawn_udp_echo().await;
        let (_control, relay_addr, _task) = start_association(false).await;

        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client_socket.send_to(&[0xFF, 0xFF], relay_addr).await.unwrap();

        let request = UdpHeader::new(TargetAddr::from(echo_addr)).encode_datagram(b"still works");
        client_socket.send_to(&request, relay_addr).await.unwrap();

        let mut buf = [0u8; MAX_UDP_PACKET];
        let (len, _) = tokio::time::timeout(
            Duration::from_secs(5),
            client_socket.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let (_, header_len) = UdpHeader::decode(&buf[..len]).unwrap();
        assert_eq!(&buf[header_len..len], b"still works");
    }
}
