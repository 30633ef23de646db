//! CONNECT command handler
//!
//! Dials the requested target, replies with the bound address of the
//! outbound socket, and splices the two byte streams until either side
//! closes.

use super::reply::{send_error_reply, send_success};
use crate::config::TimeoutConfig;
use crate::error::{ReplyCode, SocksError};
use crate::helper;
use crate::socks::TargetAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Handle a CONNECT request on an already-negotiated session.
///
/// The success reply's BND.ADDR is the local address of the outbound
/// dial (the server's egress address), not the listening address.
/// Clients generally ignore BND.ADDR for CONNECT.
pub(crate) async fn handle<S>(
    mut client: S,
    target: TargetAddr,
    timeouts: &TimeoutConfig,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target_sockaddr = match target.resolve().await {
        Ok(addr) => addr,
        Err(e) => {
            debug!(target = %target, error = %e, "target resolution failed");
            send_error_reply(&mut client, ReplyCode::from(&e), timeouts.reply()).await;
            return Err(e.into());
        }
    };

    let mut upstream =
        match tokio::time::timeout(timeouts.connect(), TcpStream::connect(target_sockaddr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(target = %target_sockaddr, error = %e, "dial failed");
                send_error_reply(&mut client, ReplyCode::from(&e), timeouts.reply()).await;
                return Err(e.into());
            }
            Err(_) => {
                debug!(target = %target_sockaddr, "dial timed out");
                send_error_reply(&mut client, ReplyCode::TtlExpired, timeouts.reply()).await;
                return Err(SocksError::Timeout("target dial"));
            }
        };

    let bound = upstream.local_addr()?;
    send_success(&mut client, bound, timeouts.reply()).await?;

    info!(target = %target, "CONNECT tunnel established");

    match helper::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_target, to_client)) => {
            debug!(to_target, to_client, "CONNECT relay finished");
        }
        Err(e) => {
            debug!(error = %e, "CONNECT relay ended with error");
        }
    }

    Ok(())
}
