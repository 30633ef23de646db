//! Test utilities shared across integration tests

use sockgate::config::ServerConfig;
use sockgate::server::{NoopObserver, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;

/// Spawn a server with the given config on an ephemeral port.
///
/// Returns the bound address and the shutdown sender.
pub async fn spawn_server(config: ServerConfig) -> (SocketAddr, broadcast::Sender<bool>) {
    let server = Server::new(config)
        .unwrap()
        .with_observer(Arc::new(NoopObserver));
    spawn_server_instance(Arc::new(server)).await
}

/// Spawn an already-built server on an ephemeral port.
pub async fn spawn_server_instance(server: Arc<Server>) -> (SocketAddr, broadcast::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move { server.run_on(listener, shutdown_rx).await });
    (addr, shutdown_tx)
}

/// Spawn a TCP echo server on an ephemeral port.
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Spawn a UDP echo server on an ephemeral port.
pub async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], from).await;
        }
    });
    addr
}

/// A TCP port that was bound and released, so nothing is listening on it.
pub async fn dead_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
