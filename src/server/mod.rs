//! SOCKS5 server
//!
//! Owns the listener, the credential store, the admission gates, and the
//! observer; accepts connections and runs one session task per client.

mod admission;
mod bind;
mod connect;
mod observer;
mod reply;
mod session;
mod udp;

pub use admission::{Admission, AdmissionError, ConnectionGauge, ConnectionPermit, TokenBucket};
pub use observer::{NoopObserver, ServerObserver, TracingObserver};

use crate::auth::{self, CredentialStore};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use session::Session;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A SOCKS5 proxy server instance.
///
/// All state a session needs hangs off this struct; there are no
/// process-wide globals.
pub struct Server {
    config: Arc<ServerConfig>,
    store: Arc<CredentialStore>,
    admission: Arc<Admission>,
    observer: Arc<dyn ServerObserver>,
}

impl Server {
    /// Build a server, seeding the credential store from the config's
    /// `user`/`password` pair.
    ///
    /// Fails when the auth configuration is invalid (empty method list,
    /// or no supported method).
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store = match config.seed_credentials() {
            Some((user, password)) => CredentialStore::from_pairs([(user, password)]),
            None => CredentialStore::new(),
        };
        Self::with_store(config, Arc::new(store))
    }

    /// Build a server around an externally owned credential store.
    ///
    /// The embedded mode uses this to keep inserting credentials while
    /// the server runs.
    pub fn with_store(config: ServerConfig, store: Arc<CredentialStore>) -> Result<Self> {
        let warnings = auth::validate_auth_config(&config.auth_list, &store)
            .context("auth configuration rejected")?;
        for warning in &warnings {
            warn!("config warning: {}", warning);
        }

        Ok(Server {
            admission: Arc::new(Admission::new(&config.limits)),
            config: Arc::new(config),
            store,
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replace the observer (tests inject a no-op)
    pub fn with_observer(mut self, observer: Arc<dyn ServerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Handle to the credential store shared with sessions
    pub fn credential_store(&self) -> Arc<CredentialStore> {
        self.store.clone()
    }

    /// Number of sessions currently admitted
    pub fn active_sessions(&self) -> usize {
        self.admission.active_sessions()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self, shutdown: broadcast::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr())
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind_addr()))?;
        info!(addr = %listener.local_addr()?, "SOCKS5 server listening");
        self.run_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until shutdown.
    ///
    /// The shutdown signal stops the accept loop first; in-flight
    /// sessions then drain on their own, with no forced mid-relay abort.
    pub async fn run_on(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown requested, closing listener");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let permit = match self.admission.admit() {
                        Ok(permit) => permit,
                        Err(reason) => {
                            // Both gates drop without sending any bytes.
                            self.observer.admission_rejected(peer, &reason.to_string());
                            drop(stream);
                            continue;
                        }
                    };

                    let config = self.config.clone();
                    let store = self.store.clone();
                    let observer = self.observer.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        observer.session_opened(peer);
                        let local_ip = stream
                            .local_addr()
                            .map(|addr| addr.ip())
                            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
                        let mut session = Session::new(peer, local_ip, config, store);
                        // Session errors are contained: they never touch
                        // the accept loop or other sessions.
                        let _ = session.run(stream).await;
                        observer.session_closed(peer);
                    });
                }
            }
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    /// Wait for admitted sessions to finish.
    async fn drain(&self) {
        let mut ticks = 0u32;
        loop {
            let active = self.admission.active_sessions();
            if active == 0 {
                return;
            }
            if ticks % 50 == 0 {
                info!(active, "waiting for sessions to finish");
            }
            ticks += 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
