//! Embedded-client mode
//!
//! Runs a local SOCKS5 server on a random high port with freshly
//! generated credentials, for programs that embed a proxy and advertise
//! it to an external controller. This module produces the advertisement;
//! reporting it over HTTP is the embedding program's job.

use crate::auth::CredentialStore;
use crate::config::{EmbeddedConfig, ServerConfig};
use crate::server::Server;
use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Lowest port the embedded server will pick
pub const EMBEDDED_PORT_MIN: u16 = 2000;

/// Highest port the embedded server will pick
pub const EMBEDDED_PORT_MAX: u16 = 65530;

/// Generated credential length in characters
const CREDENTIAL_LEN: usize = 32;

/// Attempts at finding a free port before giving up
const BIND_ATTEMPTS: u32 = 16;

/// What the embedding program reports to its controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Host the local server listens on
    pub host: String,
    /// Randomly chosen port in [`EMBEDDED_PORT_MIN`]..=[`EMBEDDED_PORT_MAX`]
    pub port: u16,
    /// Generated username
    pub username: String,
    /// Generated password
    pub password: String,
}

/// A running embedded server and its advertisement
pub struct EmbeddedServer {
    advertisement: Advertisement,
    task: JoinHandle<Result<()>>,
}

impl EmbeddedServer {
    /// The credentials and address to report
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    /// Wait for the server task to finish (it ends on shutdown signal)
    pub async fn join(self) -> Result<()> {
        self.task.await.context("embedded server task panicked")?
    }
}

/// Start the embedded server described by `config`.
///
/// Picks a random port, generates a credential pair, inserts it into a
/// fresh store, and serves until the shutdown signal fires.
pub async fn start(
    config: EmbeddedConfig,
    shutdown: broadcast::Receiver<bool>,
) -> Result<EmbeddedServer> {
    let username = random_token();
    let password = random_token();

    let store = Arc::new(CredentialStore::new());
    store.insert(username.clone(), password.clone());

    let listener = bind_random_port(&config.listen).await?;
    let port = listener.local_addr()?.port();

    let server_config = ServerConfig {
        host: config.listen.clone(),
        port,
        auth_list: config.auth_list.clone(),
        ..Default::default()
    };
    let server = Server::with_store(server_config, store)?;

    info!(
        host = %config.listen,
        port,
        controller = %config.http_server,
        "embedded SOCKS5 server starting"
    );

    let task = tokio::spawn(async move { server.run_on(listener, shutdown).await });

    Ok(EmbeddedServer {
        advertisement: Advertisement {
            host: config.listen,
            port,
            username,
            password,
        },
        task,
    })
}

/// Bind a listener on a random port in the embedded range.
async fn bind_random_port(host: &str) -> Result<TcpListener> {
    let mut last_error = None;
    for _ in 0..BIND_ATTEMPTS {
        let port = rand::thread_rng().gen_range(EMBEDDED_PORT_MIN..=EMBEDDED_PORT_MAX);
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_error = Some(e),
        }
    }
    Err(anyhow::anyhow!(
        "no free port in {}-{} after {} attempts: {}",
        EMBEDDED_PORT_MIN,
        EMBEDDED_PORT_MAX,
        BIND_ATTEMPTS,
        last_error.expect("at least one bind attempt")
    ))
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LEN)
        .map(char::from)
        .collect()
}
