//! Helper utilities

use tokio::io::{AsyncRead, AsyncWrite};

/// Bidirectional copy between two async streams.
///
/// Propagates half-close: when one side reaches EOF its write half is
/// shut down and the other direction keeps running. Returns the byte
/// counts copied in each direction once both finish.
pub async fn copy_bidirectional<A, B>(a: &mut A, b: &mut B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(a, b).await
}
