//! # Sockgate - SOCKS5 Proxy Server and Client Library
//!
//! Sockgate is a SOCKS5 (RFC 1928) proxy server with RFC 1929
//! username/password authentication, together with a matching client
//! library for embedding in other programs. It relays TCP streams
//! (CONNECT), accepts reverse TCP (BIND), and relays UDP datagrams
//! (UDP ASSOCIATE).
//!
//! ## Features
//!
//! - **Full command support**: CONNECT, BIND, and UDP ASSOCIATE
//! - **Authentication**: no-auth and username/password, selected by
//!   server priority
//! - **Admission control**: token-bucket rate limiting and a concurrent
//!   session cap, enforced before any protocol bytes flow
//! - **Client library**: the same protocol driven from the other side,
//!   including a dedicated UDP relay handle
//! - **Embedded mode**: a local server on a random high port with
//!   generated credentials, for advertisement to a controller
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockgate::config::load_config;
//! use sockgate::server::Server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     Server::new(config.server)?.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TCP listener -> Admission -> Session state machine
//!     -> (Codec, Auth engine, Address resolver) -> Command handler
//! ```
//!
//! Each accepted connection runs as an independent task; a failed
//! session never affects the accept loop or its neighbours.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod client;
pub mod config;
pub mod embedded;
pub mod error;
pub mod helper;
pub mod server;
pub mod socks;

// Re-export commonly used items
pub use auth::CredentialStore;
pub use client::{BindHandle, Socks5Client, UdpTunnel};
pub use config::{load_config, Config, ServerConfig};
pub use error::{CodecError, ReplyCode, SocksError};
pub use server::Server;
pub use socks::TargetAddr;

/// Version of the Sockgate library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
