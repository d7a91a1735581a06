//! Shared helpers for the integration suites.

use std::net::SocketAddr;
use std::sync::Arc;

use gale::{Server, ServerContext};
use tokio::net::TcpListener;

/// Serve `ctx` over cleartext HTTP on an ephemeral loopback port.
pub async fn start(ctx: Arc<ServerContext>) -> (Server, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ctx);

    let running = server.clone();
    tokio::spawn(async move {
        running.serve_on(listener).await.unwrap();
    });

    (server, addr)
}

/// Client that never reuses pooled sockets across tests.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().pool_max_idle_per_host(0).build().unwrap()
}

/// Run the full `serve()` bootstrap and wait until its listeners are bound.
#[allow(dead_code)]
pub async fn serve(ctx: Arc<ServerContext>) -> Server {
    let server = Server::new(ctx);
    let running = server.clone();
    tokio::spawn(async move {
        running.serve().await.unwrap();
    });

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while server.local_addr().is_none() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    server
}

/// Send raw request bytes and read until the server closes the socket.
#[allow(dead_code)]
pub async fn exchange(addr: SocketAddr, request: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply).await;
    String::from_utf8_lossy(&reply).into_owned()
}
