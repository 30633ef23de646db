//! Username/password sub-negotiation (RFC 1929)

use super::store::CredentialStore;
use crate::error::{CodecError, SocksError};
use crate::socks::codec::{UserPassReply, UserPassRequest};
use crate::socks::consts::{SOCKS5_AUTH_FAILURE, SOCKS5_AUTH_SUCCESS, SOCKS5_AUTH_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Drive the server side of the username/password sub-negotiation.
///
/// Reads the request, verifies against the store, and answers `[1, 0]`
/// on success or `[1, 1]` on any failure. Empty usernames, empty
/// passwords, unknown users and wrong passwords are indistinguishable
/// on the wire.
///
/// Returns the authenticated username.
pub async fn authenticate<S>(
    stream: &mut S,
    store: &CredentialStore,
) -> Result<String, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match read_request(stream).await {
        Ok(req) => req,
        Err(SocksError::Codec(e)) => {
            // The frame was intelligible enough to answer before closing.
            send_status(stream, SOCKS5_AUTH_FAILURE).await?;
            return Err(SocksError::Codec(e));
        }
        Err(e) => return Err(e),
    };

    match verify(store, &request) {
        Some(username) => {
            send_status(stream, SOCKS5_AUTH_SUCCESS).await?;
            tracing::debug!(username = %username, "authentication succeeded");
            Ok(username)
        }
        None => {
            send_status(stream, SOCKS5_AUTH_FAILURE).await?;
            Err(SocksError::AuthFailed)
        }
    }
}

/// Read a `UserPassRequest` from the stream field by field, then run it
/// back through the codec so validation lives in one place.
async fn read_request<S>(stream: &mut S) -> Result<UserPassRequest, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_AUTH_VERSION {
        return Err(CodecError::BadVersion(head[0]).into());
    }

    let ulen = head[1] as usize;
    let mut frame = Vec::with_capacity(3 + ulen);
    frame.extend_from_slice(&head);
    frame.resize(2 + ulen, 0);
    stream.read_exact(&mut frame[2..2 + ulen]).await?;

    let mut plen_byte = [0u8; 1];
    stream.read_exact(&mut plen_byte).await?;
    frame.push(plen_byte[0]);
    let plen = plen_byte[0] as usize;

    let start = frame.len();
    frame.resize(start + plen, 0);
    stream.read_exact(&mut frame[start..]).await?;

    let (request, _) = UserPassRequest::decode(&frame)?;
    Ok(request)
}

/// Check a request against the store, returning the username on success.
fn verify(store: &CredentialStore, request: &UserPassRequest) -> Option<String> {
    if request.username.is_empty() || request.password.is_empty() {
        return None;
    }
    let username = std::str::from_utf8(&request.username).ok()?;
    let expected = store.password_for(username)?;

    // Accumulate the comparison over every byte instead of returning at
    // the first mismatch, so response latency does not reveal how much
    // of the password was right.
    let supplied = &request.password;
    let mismatch = expected.len() != supplied.len()
        || expected
            .bytes()
            .zip(supplied.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            != 0;

    if mismatch {
        None
    } else {
        Some(username.to_string())
    }
}

async fn send_status<S: AsyncWrite + Unpin>(stream: &mut S, status: u8) -> Result<(), SocksError> {
    stream
        .write_all(&UserPassReply { status }.encode())
        .await?;
    stream.flush().await?;
    Ok(())
}
