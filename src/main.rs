//! Sockgate - SOCKS5 proxy server
//!
//! Main entry point for the standalone server binary.

use anyhow::Result;
use clap::Parser;
use sockgate::config::load_config;
use sockgate::server::Server;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Sockgate - SOCKS5 proxy server with an embeddable client library
#[derive(Parser, Debug)]
#[command(name = "sockgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration; parse errors are fatal and exit non-zero.
    let config = load_config(&args.config)?;

    info!("Sockgate v{}", sockgate::VERSION);
    info!("Configuration loaded from: {:?}", args.config);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    watch_for_shutdown(shutdown_tx.clone());

    // Embedded mode takes over when configured; otherwise run the
    // standalone server.
    if let Some(embedded_config) = config.embedded {
        let controller = embedded_config.http_server.clone();
        let embedded = sockgate::embedded::start(embedded_config, shutdown_rx).await?;
        let ad = embedded.advertisement();
        info!(
            host = %ad.host,
            port = ad.port,
            username = %ad.username,
            controller = %controller,
            "embedded server running; report these credentials to the controller"
        );
        embedded.join().await
    } else {
        info!("Listening on: {}", config.server.bind_addr());
        let server = Server::new(config.server)?;
        server.run(shutdown_rx).await
    }
}

/// Install the global tracing subscriber.
///
/// Unknown level names fall back to `info` rather than refusing to
/// start.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level);

    match json {
        true => tracing::subscriber::set_global_default(builder.json().finish())?,
        false => tracing::subscriber::set_global_default(builder.with_target(true).finish())?,
    }
    Ok(())
}

/// Trip the shutdown channel once the process is told to stop.
fn watch_for_shutdown(shutdown_tx: broadcast::Sender<bool>) {
    tokio::spawn(async move {
        let signal_name = stop_signal().await;
        info!(signal = signal_name, "stopping on signal");
        let _ = shutdown_tx.send(true);
    });
}

/// Wait for a termination request and name the signal that carried it.
#[cfg(unix)]
async fn stop_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            // Rare, but interrupt alone still gives a clean exit path.
            tracing::warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = tokio::signal::ctrl_c() => "SIGINT",
    }
}

/// Wait for a termination request and name the signal that carried it.
#[cfg(not(unix))]
async fn stop_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "interrupt"
}
