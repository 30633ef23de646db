//! Per-connection session state machine
//!
//! Owns one accepted connection from negotiation to cleanup: negotiate,
//! authenticate, read the request, dispatch to the command handler. Every
//! stage before relaying runs under its configured deadline.

use super::{bind, connect, udp};
use super::reply::send_error_reply;
use crate::auth::{self, CredentialStore};
use crate::config::ServerConfig;
use crate::error::{CodecError, ReplyCode, SocksError};
use crate::socks::codec::Request;
use crate::socks::consts::*;
use crate::socks::SocksCommand;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info, trace};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Created on accept, nothing read yet
    Init,
    /// Reading the method-selection request
    Negotiating,
    /// Driving the username/password sub-negotiation
    Authenticating,
    /// Reading the command request
    Requesting,
    /// CONNECT or post-BIND splice in progress
    RelayingTcp,
    /// BIND listener waiting for its single inbound connection
    WaitingBind,
    /// UDP association alive, control connection held open
    RelayingUdp,
    /// Terminal state
    Closed,
}

/// One accepted connection's context and protocol driver
pub(crate) struct Session {
    peer: SocketAddr,
    local_ip: IpAddr,
    config: Arc<ServerConfig>,
    store: Arc<CredentialStore>,
    state: SessionState,
    auth_method: Option<u8>,
    principal: Option<String>,
}

impl Session {
    /// Create a session for an accepted connection.
    ///
    /// `local_ip` is the address the client reached the server on; UDP
    /// associations advertise it when the relay socket binds a wildcard.
    pub(crate) fn new(
        peer: SocketAddr,
        local_ip: IpAddr,
        config: Arc<ServerConfig>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Session {
            peer,
            local_ip,
            config,
            store,
            state: SessionState::Init,
            auth_method: None,
            principal: None,
        }
    }

    /// Drive the session to completion. Errors end the session; nothing
    /// is retried.
    pub(crate) async fn run<S>(&mut self, mut stream: S) -> Result<(), SocksError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.drive(&mut stream).await;
        self.transition(SessionState::Closed);
        if let Err(e) = &result {
            debug!(peer = %self.peer, error = %e, "session ended with error");
        }
        result
    }

    async fn drive<S>(&mut self, stream: &mut S) -> Result<(), SocksError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeouts = self.config.timeouts.clone();

        // Negotiation and authentication share one deadline.
        let handshake_deadline = timeouts.handshake();
        let handshake = async {
            self.transition(SessionState::Negotiating);
            let method = auth::negotiate_method(stream, &self.config.auth_list).await?;
            self.auth_method = Some(method);

            match method {
                SOCKS5_AUTH_METHOD_NONE => Ok(()),
                SOCKS5_AUTH_METHOD_PASSWORD => {
                    self.transition(SessionState::Authenticating);
                    let principal = auth::authenticate_password(stream, &self.store).await?;
                    self.principal = Some(principal);
                    Ok(())
                }
                other => Err(SocksError::UnsupportedMethod(other)),
            }
        };
        timeout(handshake_deadline, handshake)
            .await
            .map_err(|_| SocksError::Timeout("handshake"))??;
        debug!(
            peer = %self.peer,
            method = ?self.auth_method,
            principal = ?self.principal,
            "handshake complete"
        );

        self.transition(SessionState::Requesting);
        let request = match timeout(timeouts.request(), read_request(stream)).await {
            Err(_) => return Err(SocksError::Timeout("request read")),
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                // Only an unknown ATYP owes a reply; truncated or
                // malformed requests close silently.
                if matches!(e, SocksError::Codec(CodecError::BadAddressType(_))) {
                    send_error_reply(stream, ReplyCode::AddressTypeNotSupported, timeouts.reply())
                        .await;
                }
                return Err(e);
            }
        };

        let host = request.addr.host();
        if self.config.is_blacklisted(&host) {
            info!(peer = %self.peer, %host, "destination refused by blacklist");
            send_error_reply(stream, ReplyCode::ConnectionNotAllowed, timeouts.reply()).await;
            return Err(SocksError::NotAllowed(host));
        }

        match SocksCommand::from_byte(request.command) {
            Some(SocksCommand::Connect) => {
                info!(peer = %self.peer, target = %request.addr, principal = ?self.principal, "CONNECT");
                self.transition(SessionState::RelayingTcp);
                connect::handle(&mut *stream, request.addr, &timeouts).await
            }
            Some(SocksCommand::Bind) => {
                info!(peer = %self.peer, target = %request.addr, "BIND");
                self.transition(SessionState::WaitingBind);
                bind::handle(&mut *stream, &self.config.host, request.addr, &timeouts).await
            }
            Some(SocksCommand::UdpAssociate) => {
                info!(peer = %self.peer, "UDP ASSOCIATE");
                self.transition(SessionState::RelayingUdp);
                udp::handle(
                    &mut *stream,
                    self.peer,
                    self.local_ip,
                    &self.config.host,
                    self.config.restrict_udp_source,
                    &timeouts,
                )
                .await
            }
            None => {
                send_error_reply(stream, ReplyCode::CommandNotSupported, timeouts.reply()).await;
                Err(SocksError::CommandNotSupported(request.command))
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "state");
        self.state = next;
    }
}

/// Read a command request from the stream field by field, bounded by the
/// lengths each field declares, then validate through the codec.
///
/// EOF mid-frame is a truncated frame, not an IO failure.
async fn read_request<S>(stream: &mut S) -> Result<Request, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    read_frame_bytes(stream, &mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(CodecError::BadVersion(head[0]).into());
    }

    let remaining = match head[3] {
        SOCKS5_ADDR_TYPE_IPV4 => 6,
        SOCKS5_ADDR_TYPE_IPV6 => 18,
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len_byte = [0u8; 1];
            read_frame_bytes(stream, &mut len_byte).await?;
            let len = len_byte[0] as usize;
            if len == 0 {
                return Err(CodecError::BadLength("empty domain").into());
            }
            let mut frame = head.to_vec();
            frame.push(len_byte[0]);
            let start = frame.len();
            frame.resize(start + len + 2, 0);
            read_frame_bytes(stream, &mut frame[start..]).await?;
            let (request, _) = Request::decode(&frame)?;
            return Ok(request);
        }
        other => return Err(CodecError::BadAddressType(other).into()),
    };

    let mut frame = head.to_vec();
    frame.resize(4 + remaining, 0);
    read_frame_bytes(stream, &mut frame[4..]).await?;
    let (request, _) = Request::decode(&frame)?;
    Ok(request)
}

async fn read_frame_bytes<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), SocksError>
where
    S: AsyncRead + Unpin,
{
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SocksError::Codec(CodecError::ShortFrame)
        } else {
            SocksError::Io(e)
        }
    })?;
    Ok(())
}
