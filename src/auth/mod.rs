//! Authentication engine
//!
//! Method selection by server priority, the username/password
//! sub-negotiation, and startup validation of the configured method
//! list.

mod password;
mod store;

pub use password::authenticate as authenticate_password;
pub use store::CredentialStore;

use crate::error::{CodecError, SocksError};
use crate::socks::codec::{MethodReply, MethodRequest};
use crate::socks::consts::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Methods this implementation can actually drive
const SUPPORTED_METHODS: [u8; 2] = [SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD];

/// Select an authentication method.
///
/// Scans the server's ordered list and returns the first method the
/// client also offered; `None` means no acceptable method. Methods the
/// client offers but the server does not list are ignored.
pub fn select_method(offered: &[u8], auth_list: &[u8]) -> Option<u8> {
    auth_list
        .iter()
        .copied()
        .find(|method| offered.contains(method))
}

/// Drive the server side of method negotiation: read the client's offer,
/// pick a method by server priority, and answer it.
///
/// Configured methods this implementation cannot drive are skipped, so a
/// client offering only those still gets `[5, 0xFF]`. On "no acceptable
/// method" that reply is written before the error is returned; the
/// caller closes the connection without sending anything further.
pub async fn negotiate_method<S>(stream: &mut S, auth_list: &[u8]) -> Result<u8, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offer = read_method_request(stream).await?;

    let effective: Vec<u8> = auth_list
        .iter()
        .copied()
        .filter(|method| SUPPORTED_METHODS.contains(method))
        .collect();
    let selected = match select_method(&offer.methods, &effective) {
        Some(method) => method,
        None => {
            write_method_reply(stream, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE).await?;
            return Err(SocksError::NoAcceptableMethod);
        }
    };

    write_method_reply(stream, selected).await?;
    tracing::debug!(method = selected, "authentication method selected");
    Ok(selected)
}

/// Validate the configured method list and credential store at startup.
///
/// Returns warnings for conditions the server can run with; an empty
/// list or a list without a single supported method is fatal.
pub fn validate_auth_config(
    auth_list: &[u8],
    store: &CredentialStore,
) -> anyhow::Result<Vec<String>> {
    if auth_list.is_empty() {
        anyhow::bail!("auth_list is empty");
    }
    if !auth_list.iter().any(|m| SUPPORTED_METHODS.contains(m)) {
        anyhow::bail!("auth_list contains no supported method (0x00 or 0x02)");
    }

    let mut warnings = Vec::new();
    for method in auth_list {
        if !SUPPORTED_METHODS.contains(method) {
            warnings.push(format!(
                "configured auth method {:#04x} is not supported and will never be selected",
                method
            ));
        }
    }
    if auth_list.contains(&SOCKS5_AUTH_METHOD_PASSWORD) && store.is_empty() {
        warnings.push(
            "username/password auth is configured but the credential store is empty".to_string(),
        );
    }
    warnings.extend(store.entry_warnings());

    Ok(warnings)
}

async fn read_method_request<S>(stream: &mut S) -> Result<MethodRequest, SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(CodecError::BadVersion(head[0]).into());
    }
    let count = head[1] as usize;
    if count == 0 {
        return Err(CodecError::BadLength("zero methods").into());
    }

    let mut frame = Vec::with_capacity(2 + count);
    frame.extend_from_slice(&head);
    frame.resize(2 + count, 0);
    stream.read_exact(&mut frame[2..]).await?;

    let (request, _) = MethodRequest::decode(&frame)?;
    Ok(request)
}

async fn write_method_reply<S>(stream: &mut S, method: u8) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&MethodReply { method }.encode()).await?;
    stream.flush().await?;
    Ok(())
}
