//! BIND command handler
//!
//! Allocates a listening endpoint on the server's bind interface, tells
//! the client where it is, accepts exactly one inbound connection, and
//! splices it with the client stream.

use super::reply::{send_error_reply, send_success};
use crate::config::TimeoutConfig;
use crate::error::{ReplyCode, SocksError};
use crate::helper;
use crate::socks::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Handle a BIND request on an already-negotiated session.
///
/// First reply carries the listener address, the second the connected
/// peer's address. An accept deadline overrun tears the listener down
/// and closes the session without a second reply.
pub(crate) async fn handle<S>(
    mut client: S,
    bind_host: &str,
    target: TargetAddr,
    timeouts: &TimeoutConfig,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let listener = match TcpListener::bind((bind_host, 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            debug!(error = %e, "BIND listener allocation failed");
            send_error_reply(&mut client, ReplyCode::GeneralFailure, timeouts.reply()).await;
            return Err(e.into());
        }
    };

    let listen_addr = listener.local_addr()?;
    send_success(&mut client, listen_addr, timeouts.reply()).await?;
    info!(listen = %listen_addr, target = %target, "BIND listener ready");

    let (mut inbound, peer) =
        match tokio::time::timeout(timeouts.bind_accept(), listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                debug!(error = %e, "BIND accept failed");
                return Err(e.into());
            }
            Err(_) => {
                debug!(listen = %listen_addr, "BIND accept timed out");
                return Err(SocksError::Timeout("bind accept"));
            }
        };
    drop(listener);

    send_success(&mut client, peer, timeouts.reply()).await?;
    info!(peer = %peer, "BIND connection established");

    match helper::copy_bidirectional(&mut client, &mut inbound).await {
        Ok((to_peer, to_client)) => {
            debug!(to_peer, to_client, "BIND relay finished");
        }
        Err(e) => {
            debug!(error = %e, "BIND relay ended with error");
        }
    }

    Ok(())
}
