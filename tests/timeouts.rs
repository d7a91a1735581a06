//! Connection timeouts observed over real sockets.

mod common;

use std::time::{Duration, Instant};

use gale::config::ServerConfig;
use gale::http::handler_fn;
use gale::routing::RouteTable;
use gale::ServerContext;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn routes() -> RouteTable {
    RouteTable::new()
        .get(
            "/",
            handler_fn(|_req, res| Box::pin(async move { res.write_string("hello").await })),
        )
        .get(
            "/slow",
            handler_fn(|_req, res| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    res.write_string("done").await
                })
            }),
        )
        .post(
            "/upload",
            handler_fn(|req, res| {
                Box::pin(async move {
                    let body = req.bytes().await?;
                    res.write_string(&format!("{} bytes", body.len())).await
                })
            }),
        )
}

fn timeouts(read: u64, idle: u64) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.timeouts.read_secs = read;
    config.timeouts.idle_secs = idle;
    config
}

#[tokio::test]
async fn handler_may_outlast_the_read_timeout() {
    let ctx = ServerContext::builder(timeouts(1, 0)).router(routes()).build();
    let (_server, addr) = common::start(ctx).await;

    let res = common::client().get(format!("http://{addr}/slow")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "done");
}

#[tokio::test]
async fn stalled_request_body_gets_408() {
    let ctx = ServerContext::builder(timeouts(1, 0)).router(routes()).build();
    let (_server, addr) = common::start(ctx).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\n01234")
        .await
        .unwrap();

    let mut reply = vec![0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut reply))
        .await
        .unwrap()
        .unwrap();
    let reply = String::from_utf8_lossy(&reply[..n]);
    assert!(reply.starts_with("HTTP/1.1 408"), "{reply}");
}

#[tokio::test]
async fn idle_keep_alive_connection_is_closed() {
    let ctx = ServerContext::builder(timeouts(0, 1)).router(routes()).build();
    let (server, addr) = common::start(ctx).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut reply = Vec::new();
    let mut chunk = [0u8; 512];
    while !String::from_utf8_lossy(&reply).ends_with("hello") {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "closed before the response");
        reply.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(server.active_connections(), 1);

    let started = Instant::now();
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut chunk))
        .await
        .expect("idle connection stayed open")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn idle_clock_ignores_requests_in_flight() {
    let ctx = ServerContext::builder(timeouts(0, 1)).router(routes()).build();
    let (_server, addr) = common::start(ctx).await;

    let res = common::client().get(format!("http://{addr}/slow")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "done");
}

#[tokio::test]
async fn refused_h2_host_closes_the_connection() {
    let mut config = ServerConfig::default();
    config.security.host_whitelist = vec!["allowed.test".to_string()];
    let ctx = ServerContext::builder(config).router(routes()).build();
    let (server, addr) = common::start(ctx).await;

    let client = reqwest::Client::builder().http2_prior_knowledge().build().unwrap();
    assert!(client.get(format!("http://{addr}/")).send().await.is_err());

    tokio::time::timeout(Duration::from_secs(2), async {
        while server.active_connections() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection outlived the refused stream");
    drop(client);
}
