//! Listener topologies started through `Server::serve`.

mod common;

use std::sync::Arc;

use gale::config::ServerConfig;
use gale::http::handler_fn;
use gale::net::acme::{CertificateManager, DirCacheManager};
use gale::routing::RouteTable;
use gale::{Server, ServerContext, ServerError};

fn routes() -> RouteTable {
    RouteTable::new().get(
        "/",
        handler_fn(|_req, res| Box::pin(async move { res.write_string("hello").await })),
    )
}

fn loopback() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.address = "127.0.0.1:0".to_string();
    config.listener.https_port = 0;
    config.listener.plain_http_port = 0;
    config
}

/// Self-signed `localhost` certificate written as two PEM files.
struct TestCertificate {
    dir: tempfile::TempDir,
    cert_pem: String,
}

impl TestCertificate {
    fn new() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_pem = certified.cert.pem();
        std::fs::write(dir.path().join("cert.pem"), &cert_pem).unwrap();
        std::fs::write(dir.path().join("key.pem"), certified.key_pair.serialize_pem()).unwrap();
        Self { dir, cert_pem }
    }

    fn configure(&self, config: &mut ServerConfig) {
        config.tls.cert_file = self.dir.path().join("cert.pem").display().to_string();
        config.tls.key_file = self.dir.path().join("key.pem").display().to_string();
    }

    fn client(&self, addr: std::net::SocketAddr) -> reqwest::Client {
        reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(self.cert_pem.as_bytes()).unwrap())
            .resolve("localhost", addr)
            .resolve("other.test", addr)
            .pool_max_idle_per_host(0)
            .build()
            .unwrap()
    }
}

async fn start(config: ServerConfig) -> Server {
    common::serve(ServerContext::builder(config).router(routes()).build()).await
}

#[tokio::test]
async fn plaintext_run_has_no_secondary_listener() {
    let server = start(loopback()).await;
    let addr = server.local_addr().unwrap();

    assert!(server.plain_addr().is_none());
    let res = common::client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn debug_mode_ignores_acme() {
    let mut config = loopback();
    config.debug_mode = true;
    config.acme.enabled = true;
    let server = start(config).await;

    assert!(server.plain_addr().is_none());
    let reply = common::exchange(
        server.local_addr().unwrap(),
        "GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
}

#[tokio::test]
async fn static_certificate_serves_h2_over_tls() {
    let certificate = TestCertificate::new();
    let mut config = loopback();
    certificate.configure(&mut config);
    let server = start(config).await;
    let addr = server.local_addr().unwrap();

    assert!(server.plain_addr().is_none());
    let res = certificate
        .client(addr)
        .get(format!("https://localhost:{}/", addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.version(), reqwest::Version::HTTP_2);
    assert_eq!(res.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn unlisted_server_name_fails_the_handshake() {
    let certificate = TestCertificate::new();
    let mut config = loopback();
    certificate.configure(&mut config);
    config.security.host_whitelist = vec!["localhost".to_string()];
    let server = start(config).await;
    let addr = server.local_addr().unwrap();
    let client = certificate.client(addr);

    let refused = client.get(format!("https://other.test:{}/", addr.port())).send().await;
    assert!(refused.is_err());

    let allowed = client
        .get(format!("https://localhost:{}/", addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
}

#[tokio::test]
async fn enforced_https_redirects_hostnames_and_serves_ips() {
    let certificate = TestCertificate::new();
    let mut config = loopback();
    certificate.configure(&mut config);
    config.security.https_enforced = true;
    let server = start(config).await;
    let tls_port = server.local_addr().unwrap().port();
    let plain = server.plain_addr().unwrap();

    let redirect = common::exchange(
        plain,
        "GET /path?x=1 HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await
    .to_ascii_lowercase();
    assert!(redirect.starts_with("http/1.1 301"), "{redirect}");
    assert!(
        redirect.contains(&format!("location: https://example.com:{tls_port}/path?x=1")),
        "{redirect}"
    );

    let direct = common::exchange(
        plain,
        "GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(direct.starts_with("HTTP/1.1 200"), "{direct}");
    assert!(direct.ends_with("hello"), "{direct}");
}

#[tokio::test]
async fn acme_listener_answers_challenges_for_listed_hosts_only() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(DirCacheManager::new(dir.path()));
    manager.register_challenge("tok", "tok.thumbprint");

    let mut config = loopback();
    config.acme.enabled = true;
    config.security.host_whitelist = vec!["example.com".to_string()];
    let ctx = ServerContext::builder(config)
        .router(routes())
        .certificate_manager(manager as Arc<dyn CertificateManager>)
        .build();
    let server = common::serve(ctx).await;
    let plain = server.plain_addr().unwrap();
    assert_ne!(plain, server.local_addr().unwrap());

    let answered = common::exchange(
        plain,
        "GET /.well-known/acme-challenge/tok HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(answered.starts_with("HTTP/1.1 200"), "{answered}");
    assert!(answered.ends_with("tok.thumbprint"), "{answered}");

    let refused = common::exchange(
        plain,
        "GET /.well-known/acme-challenge/tok HTTP/1.1\r\nHost: evil.example\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(refused.is_empty(), "{refused}");
}

#[tokio::test]
async fn invalid_address_is_a_config_error() {
    let mut config = loopback();
    config.listener.address = "not an address".to_string();
    let err = Server::new(ServerContext::with_defaults(config)).serve().await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
}

#[tokio::test]
async fn unreadable_certificate_is_a_tls_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = loopback();
    config.tls.cert_file = dir.path().join("missing.pem").display().to_string();
    config.tls.key_file = dir.path().join("missing.key").display().to_string();

    let err = Server::new(ServerContext::with_defaults(config)).serve().await.unwrap_err();
    assert!(matches!(err, ServerError::Tls(_)), "{err}");
}

#[tokio::test]
async fn taken_port_is_a_bind_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = loopback();
    config.listener.address = taken.local_addr().unwrap().to_string();

    let err = Server::new(ServerContext::with_defaults(config)).serve().await.unwrap_err();
    assert!(matches!(err, ServerError::Bind(_)), "{err}");
}
