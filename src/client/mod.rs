//! SOCKS5 client library
//!
//! The inverse protocol driver: dial the proxy, negotiate a method,
//! authenticate when asked, issue a command, and hand back the resulting
//! byte stream or UDP relay handle.

mod udp;

pub use udp::UdpTunnel;

use crate::error::{CodecError, ReplyCode, SocksError};
use crate::socks::codec::{
    MethodReply, Reply, Request, UserPassReply, UserPassRequest,
};
use crate::socks::consts::*;
use crate::socks::{SocksCommand, TargetAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Per-operation deadlines for the client
#[derive(Debug, Clone)]
pub struct ClientTimeouts {
    /// Dialling the proxy server
    pub connect: Duration,
    /// Method negotiation plus authentication
    pub handshake: Duration,
    /// Writing the request and reading the reply
    pub request: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        ClientTimeouts {
            connect: Duration::from_secs(10),
            handshake: Duration::from_secs(10),
            request: Duration::from_secs(10),
        }
    }
}

/// A SOCKS5 client bound to one proxy server.
///
/// Cheap to construct; every operation dials a fresh connection to the
/// proxy, as the protocol requires.
#[derive(Debug, Clone)]
pub struct Socks5Client {
    server: String,
    credentials: Option<(String, String)>,
    timeouts: ClientTimeouts,
}

impl Socks5Client {
    /// Create a client for the proxy at `server` (a `host:port` string)
    pub fn new(server: impl Into<String>) -> Self {
        Socks5Client {
            server: server.into(),
            credentials: None,
            timeouts: ClientTimeouts::default(),
        }
    }

    /// Attach username/password credentials.
    ///
    /// The client then offers username/password ahead of no-auth and
    /// completes the sub-negotiation when the server picks it.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Override the per-operation deadlines
    pub fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// CONNECT to `host:port` through the proxy and return the relayed
    /// stream.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, SocksError> {
        let target = TargetAddr::from_parts(host, port)?;
        let mut stream = self.dial_and_handshake().await?;
        let bound = self
            .request(&mut stream, SocksCommand::Connect, &target)
            .await?;
        debug!(%target, %bound, "CONNECT established");
        Ok(stream)
    }

    /// BIND through the proxy.
    ///
    /// The returned handle exposes the proxy-side listener address; call
    /// [`BindHandle::accept`] to wait for the inbound peer and get the
    /// relayed stream.
    pub async fn bind(&self, host: &str, port: u16) -> Result<BindHandle, SocksError> {
        let target = TargetAddr::from_parts(host, port)?;
        let mut stream = self.dial_and_handshake().await?;
        let bound = self
            .request(&mut stream, SocksCommand::Bind, &target)
            .await?;
        debug!(%bound, "BIND listener allocated");
        Ok(BindHandle { stream, bound })
    }

    /// UDP ASSOCIATE through the proxy.
    ///
    /// `target` is the destination captured by the returned tunnel's
    /// `send`; pass `None` for the `0.0.0.0:0` convention and address
    /// each datagram explicitly with `send_to`.
    pub async fn udp_associate(
        &self,
        target: Option<TargetAddr>,
    ) -> Result<UdpTunnel, SocksError> {
        let mut stream = self.dial_and_handshake().await?;
        let request_addr = target.clone().unwrap_or_default();
        let bound = self
            .request(&mut stream, SocksCommand::UdpAssociate, &request_addr)
            .await?;
        debug!(%bound, "UDP association granted");
        UdpTunnel::establish(stream, bound, target).await
    }

    async fn dial_and_handshake(&self) -> Result<TcpStream, SocksError> {
        let mut stream = timeout(self.timeouts.connect, TcpStream::connect(&self.server))
            .await
            .map_err(|_| SocksError::Timeout("proxy dial"))??;

        timeout(self.timeouts.handshake, self.handshake(&mut stream))
            .await
            .map_err(|_| SocksError::Timeout("handshake"))??;
        Ok(stream)
    }

    /// The ordered method offer: password ahead of no-auth when
    /// credentials are attached.
    fn offered_methods(&self) -> Vec<u8> {
        let mut methods = Vec::with_capacity(2);
        if self.credentials.is_some() {
            methods.push(SOCKS5_AUTH_METHOD_PASSWORD);
        }
        methods.push(SOCKS5_AUTH_METHOD_NONE);
        methods
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<(), SocksError> {
        let offer = crate::socks::codec::MethodRequest {
            methods: self.offered_methods(),
        };
        stream.write_all(&offer.encode()).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        let (selection, _) = MethodReply::decode(&reply)?;

        match selection.method {
            SOCKS5_AUTH_METHOD_NONE => Ok(()),
            SOCKS5_AUTH_METHOD_PASSWORD => self.sub_negotiate(stream).await,
            SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => Err(SocksError::NoAcceptableMethod),
            other => Err(SocksError::UnsupportedMethod(other)),
        }
    }

    async fn sub_negotiate(&self, stream: &mut TcpStream) -> Result<(), SocksError> {
        let (username, password) = self
            .credentials
            .as_ref()
            .ok_or(SocksError::UnsupportedMethod(SOCKS5_AUTH_METHOD_PASSWORD))?;

        let request = UserPassRequest {
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
        };
        stream.write_all(&request.encode()).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        let (status, _) = UserPassReply::decode(&reply)?;
        if status.status != SOCKS5_AUTH_SUCCESS {
            return Err(SocksError::AuthFailed);
        }
        Ok(())
    }

    /// Write a request, read the reply, and return the bound address.
    async fn request(
        &self,
        stream: &mut TcpStream,
        command: SocksCommand,
        target: &TargetAddr,
    ) -> Result<TargetAddr, SocksError> {
        let exchange = async {
            let request = Request {
                command: command.to_byte(),
                addr: target.clone(),
            };
            stream.write_all(&request.encode()).await?;
            read_reply(stream).await
        };
        let reply = timeout(self.timeouts.request, exchange)
            .await
            .map_err(|_| SocksError::Timeout("request"))??;

        if reply.status != u8::from(ReplyCode::Succeeded) {
            return Err(SocksError::Rejected(ReplyCode::try_from(reply.status)?));
        }
        Ok(reply.addr)
    }
}

/// A pending BIND: the proxy is listening and waiting for one inbound
/// connection.
#[derive(Debug)]
pub struct BindHandle {
    stream: TcpStream,
    bound: TargetAddr,
}

impl BindHandle {
    /// The proxy-side listener address to hand to the remote party
    pub fn bound_addr(&self) -> &TargetAddr {
        &self.bound
    }

    /// Wait for the inbound connection; returns its address and the
    /// relayed stream.
    ///
    /// There is no deadline here: the remote party connects on its own
    /// schedule, and the proxy enforces its accept timeout anyway. Wrap
    /// in `tokio::time::timeout` for a caller-side bound.
    pub async fn accept(mut self) -> Result<(TargetAddr, TcpStream), SocksError> {
        let reply = read_reply(&mut self.stream).await?;
        if reply.status != u8::from(ReplyCode::Succeeded) {
            return Err(SocksError::Rejected(ReplyCode::try_from(reply.status)?));
        }
        Ok((reply.addr, self.stream))
    }
}

/// Read a reply frame field by field and validate it through the codec
async fn read_reply(stream: &mut TcpStream) -> Result<Reply, SocksError> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(CodecError::BadVersion(head[0]).into());
    }

    let mut frame = head.to_vec();
    match head[3] {
        SOCKS5_ADDR_TYPE_IPV4 => {
            frame.resize(4 + 6, 0);
            stream.read_exact(&mut frame[4..]).await?;
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            frame.resize(4 + 18, 0);
            stream.read_exact(&mut frame[4..]).await?;
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len_byte = [0u8; 1];
            stream.read_exact(&mut len_byte).await?;
            frame.push(len_byte[0]);
            let len = len_byte[0] as usize;
            if len == 0 {
                return Err(SocksError::MalformedReply);
            }
            let start = frame.len();
            frame.resize(start + len + 2, 0);
            stream.read_exact(&mut frame[start..]).await?;
        }
        _ => return Err(SocksError::MalformedReply),
    }

    let (reply, _) = Reply::decode(&frame)?;
    Ok(reply)
}
