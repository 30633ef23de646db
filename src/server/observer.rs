//! Server observability seam
//!
//! Session and admission events surface through a trait so statistics
//! stay out of the protocol path; tests inject the no-op.

use std::net::SocketAddr;

/// Callbacks the server invokes around session lifecycle events
pub trait ServerObserver: Send + Sync {
    /// A session passed admission and is being served
    fn session_opened(&self, _peer: SocketAddr) {}

    /// A session finished, on any path
    fn session_closed(&self, _peer: SocketAddr) {}

    /// A connection was dropped at the door
    fn admission_rejected(&self, _peer: SocketAddr, _reason: &str) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ServerObserver for NoopObserver {}

/// Observer that emits tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ServerObserver for TracingObserver {
    fn session_opened(&self, peer: SocketAddr) {
        tracing::debug!(%peer, "session opened");
    }

    fn session_closed(&self, peer: SocketAddr) {
        tracing::debug!(%peer, "session closed");
    }

    fn admission_rejected(&self, peer: SocketAddr, reason: &str) {
        tracing::warn!(%peer, reason, "connection rejected");
    }
}
