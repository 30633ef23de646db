//! Client-side UDP relay handle

use crate::error::SocksError;
use crate::socks::codec::UdpHeader;
use crate::socks::consts::MAX_UDP_PACKET;
use crate::socks::TargetAddr;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

/// A live UDP association.
///
/// Backed by a fresh UDP socket dialled to the relay address from the
/// server's reply. The TCP control connection is held inside the handle:
/// dropping the tunnel closes it, which tears the association down on
/// the server.
#[derive(Debug)]
pub struct UdpTunnel {
    // Liveness gate only; the server watches for its close.
    _control: TcpStream,
    socket: UdpSocket,
    target: Option<TargetAddr>,
}

impl UdpTunnel {
    /// Dial the relay address from the reply and wrap it in a handle.
    ///
    /// Servers behind a wildcard bind may advertise an unspecified
    /// address; the proxy's own address substitutes for it.
    pub(crate) async fn establish(
        control: TcpStream,
        bound: TargetAddr,
        target: Option<TargetAddr>,
    ) -> Result<Self, SocksError> {
        let mut relay = bound.resolve().await?;
        if relay.ip().is_unspecified() {
            relay.set_ip(control.peer_addr()?.ip());
        }

        let bind_addr = if relay.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(relay).await?;
        debug!(%relay, "UDP tunnel ready");

        Ok(UdpTunnel {
            _control: control,
            socket,
            target,
        })
    }

    /// The destination captured at construction time
    pub fn target(&self) -> Option<&TargetAddr> {
        self.target.as_ref()
    }

    /// Send a payload to the captured target.
    ///
    /// Fails when the tunnel was built without one (the `0.0.0.0:0`
    /// convention); use [`UdpTunnel::send_to`] instead.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SocksError> {
        let target = self.target.clone().ok_or_else(|| {
            SocksError::InvalidAddress("tunnel has no captured target".to_string())
        })?;
        self.send_to(payload, &target).await
    }

    /// Send a payload to an explicit destination
    pub async fn send_to(&self, payload: &[u8], target: &TargetAddr) -> Result<(), SocksError> {
        let datagram = UdpHeader::new(target.clone()).encode_datagram(payload);
        self.socket.send(&datagram).await?;
        Ok(())
    }

    /// Receive the next payload, dropping anything malformed or
    /// fragmented on the way
    pub async fn recv(&self) -> Result<Vec<u8>, SocksError> {
        let (payload, _) = self.recv_from().await?;
        Ok(payload)
    }

    /// Receive the next payload together with its source address
    pub async fn recv_from(&self) -> Result<(Vec<u8>, TargetAddr), SocksError> {
        let mut buf = vec![0u8; MAX_UDP_PACKET];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            match UdpHeader::decode(&buf[..len]) {
                Ok((header, header_len)) if header.frag == 0 => {
                    return Ok((buf[header_len..len].to_vec(), header.addr));
                }
                Ok((header, _)) => {
                    debug!(frag = header.frag, "dropping fragmented datagram");
                }
                Err(e) => {
                    debug!(error = %e, "dropping malformed datagram");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    // The happy path needs a live server and lives in the integration
    // tests; here we cover the handle's target bookkeeping.

    #[tokio::test]
    async fn test_send_without_target_fails() {
        // A loopback pair standing in for the control/relay sockets.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let (control, _accepted) = tokio::join!(
            async { TcpStream::connect(listen_addr).await.unwrap() },
            async { listener.accept().await.unwrap() }
        );

        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bound = TargetAddr::from(relay.local_addr().unwrap());

        let tunnel = UdpTunnel::establish(control, bound, None).await.unwrap();
        assert!(tunnel.target().is_none());
        let result = tunnel.send(b"payload").await;
        assert!(matches!(result, Err(SocksError::InvalidAddress(_))));

        // Explicit addressing still works.
        let target = TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 4242);
        tunnel.send_to(b"payload", &target).await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_wraps_and_unwraps_datagrams() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let (control, _accepted) = tokio::join!(
            async { TcpStream::connect(listen_addr).await.unwrap() },
            async { listener.accept().await.unwrap() }
        );

        // A fake relay that checks the header and echoes a wrapped reply.
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let target = TargetAddr::ipv4(Ipv4Addr::new(192, 0, 2, 7), 4242);
        let expected_target = target.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_UDP_PACKET];
            let (len, from) = relay.recv_from(&mut buf).await.unwrap();
            let (header, header_len) = UdpHeader::decode(&buf[..len]).unwrap();
            assert_eq!(header.addr, expected_target);
            assert_eq!(&buf[header_len..len], b"ping");

            let reply = UdpHeader::new(header.addr).encode_datagram(b"pong");
            relay.send_to(&reply, from).await.unwrap();
        });

        let tunnel = UdpTunnel::establish(control, TargetAddr::from(relay_addr), Some(target))
            .await
            .unwrap();
        tunnel.send(b"ping").await.unwrap();

        let (payload, from) = tunnel.recv_from().await.unwrap();
        assert_eq!(payload, b"pong");
        assert_eq!(from, TargetAddr::ipv4(Ipv4Addr::new(192, 0, 2, 7), 4242));
    }
}
