//! Reply writing helpers for command handlers

use crate::error::{ReplyCode, SocksError};
use crate::socks::codec::Reply;
use crate::socks::TargetAddr;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Send a reply within the reply-write deadline.
///
/// Error replies carry `0.0.0.0:0` as the bound address.
pub(crate) async fn send_reply<S>(
    stream: &mut S,
    status: u8,
    bind_addr: Option<SocketAddr>,
    deadline: Duration,
) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    let reply = Reply::new(status, bind_addr.map(TargetAddr::from));
    let write = async {
        stream.write_all(&reply.encode()).await?;
        stream.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    tokio::time::timeout(deadline, write)
        .await
        .map_err(|_| SocksError::Timeout("reply write"))??;
    Ok(())
}

/// Send a success reply carrying the given bound address
pub(crate) async fn send_success<S>(
    stream: &mut S,
    bind_addr: SocketAddr,
    deadline: Duration,
) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, ReplyCode::Succeeded.into(), Some(bind_addr), deadline).await
}

/// Send the error reply owed for a failure, ignoring write errors; the
/// session is closing either way.
pub(crate) async fn send_error_reply<S>(stream: &mut S, code: ReplyCode, deadline: Duration)
where
    S: AsyncWrite + Unpin,
{
    let _ = send_reply(stream, code.into(), None, deadline).await;
}
