//! Listener bootstrap and connection serving.
//!
//! # Responsibilities
//! - Plan the listener topology from configuration (plaintext, static TLS,
//!   automatic TLS, secondary plaintext listener)
//! - Bind every listener before serving anything
//! - Run one task per connection: deadlines, TLS gate, HTTP/1.1 or HTTP/2
//! - Gate plaintext requests on host policy
//! - Apply the connection timeouts
//! - Drain or drop connections on shutdown and close
//!
//! # Data Flow
//! ```text
//! serve()
//!     → bind: primary (plain | tls), secondary plain (redirect/challenges)
//!     → accept loop per listener (semaphore-bounded)
//!         → TimedIo → [TlsGate] → hyper auto (h1 / h2 / h2c)
//!             → Dispatcher::serve
//! shutdown(timeout) → Draining → graceful_shutdown per connection → idle
//! close()           → Closed   → connections dropped
//! ```
//!
//! # Design Decisions
//! - Timeouts are applied where each one has meaning: the header read
//!   timeout inside hyper (and around the TLS handshake), the read timeout
//!   on the request body, the write timeout on the socket, and the idle
//!   timeout on the gap between requests
//! - A refused host drops the whole connection, HTTP/2 included, so no
//!   further stream can ride on it
//! - Cleartext HTTP/2 is detected from the prior-knowledge preface only;
//!   `Upgrade: h2c` requests are served as HTTP/1.1

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::header::HOST;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};

use crate::http::body::ResponseBody;
use crate::http::context::ServerContext;
use crate::http::dispatcher::Dispatcher;
use crate::http::redirect::{self, PlainAction, RedirectPolicy};
use crate::lifecycle::shutdown::{closed, stopped};
use crate::lifecycle::{ServerState, Shutdown};
use crate::net::connection::{ConnectionActivity, ConnectionGuard, ConnectionId, DeadlineSwitch};
use crate::net::io::TimedIo;
use crate::net::listener::{ConnectionPermit, ListenerError};
use crate::net::tls::{load_certified_key, Handshake};
use crate::net::{
    CertificateProvider, CertificateSource, ConnectionInfo, ConnectionTracker, Listener, TlsError, TlsGate,
};
use crate::security::{is_ip_literal, strip_port};

const STANDARD_PLAIN_PORT: u16 = 80;

/// Smallest HTTP/1 read buffer hyper accepts.
const MIN_READ_BUFFER: usize = 8192;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Startup and shutdown failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("tls: {0}")]
    Tls(#[from] TlsError),

    /// Connections were still open when the grace period ended; they were dropped.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimedOut(Duration),
}

/// Request served with an unlisted host. Failing the service closes the connection.
#[derive(Debug, Error)]
#[error("host not allowed")]
struct HostRejected;

/// How a listener treats its connections.
#[derive(Clone)]
enum Mode {
    /// Cleartext with per-request host gating.
    Plain,
    /// TLS; host policy is applied to the SNI name.
    Tls(Arc<TlsGate>),
    /// Secondary cleartext listener of a TLS run.
    Redirect(RedirectPolicy),
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Plain => "plain",
            Mode::Tls(_) => "tls",
            Mode::Redirect(_) => "redirect",
        }
    }
}

struct Inner {
    ctx: Arc<ServerContext>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    limit: Arc<Semaphore>,
    local_addr: OnceLock<SocketAddr>,
    plain_addr: OnceLock<SocketAddr>,
}

/// One server run: bind, serve, shut down.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let limit = Arc::new(Semaphore::new(ctx.config.listener.max_connections.max(1)));
        Self {
            inner: Arc::new(Inner {
                dispatcher: Dispatcher::new(Arc::clone(&ctx)),
                ctx,
                shutdown: Shutdown::new(),
                tracker: ConnectionTracker::new(),
                limit,
                local_addr: OnceLock::new(),
                plain_addr: OnceLock::new(),
            }),
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.inner.ctx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Address of the primary listener, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Address of the secondary plaintext listener, if one was started.
    pub fn plain_addr(&self) -> Option<SocketAddr> {
        self.inner.plain_addr.get().copied()
    }

    pub fn state(&self) -> ServerState {
        self.inner.shutdown.state()
    }

    /// Live connections across every listener.
    pub fn active_connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    /// Bind the configured listeners and serve until shutdown or close.
    ///
    /// Binding and certificate loading happen before any connection is
    /// accepted; their failures are returned without retry.
    pub async fn serve(&self) -> Result<(), ServerError> {
        let ctx = &self.inner.ctx;
        let config = &ctx.config;
        let addr: SocketAddr = config.listener.address.parse().map_err(|e| {
            ServerError::Config(format!("invalid listener address {:?}: {}", config.listener.address, e))
        })?;

        if config.debug_mode {
            tracing::info!(app = %config.app_name, "Serving in debug mode");
        }

        let mut listeners = Vec::with_capacity(2);
        let mut challenge_manager = None;

        let tls_port = if config.has_static_certificate() {
            let key = load_certified_key(Path::new(&config.tls.cert_file), Path::new(&config.tls.key_file))?;
            let gate = self.gate(CertificateSource::Static(key))?;
            let listener = self.bind(addr).await?;
            let port = bound_port(&listener, addr.port());
            listeners.push((listener, Mode::Tls(gate)));
            Some(port)
        } else if let Some(manager) = ctx.certificate_manager.clone().filter(|_| config.acme_active()) {
            challenge_manager = Some(Arc::clone(&manager));
            let gate = self.gate(CertificateSource::Managed(manager))?;
            let tls_addr = SocketAddr::new(addr.ip(), config.listener.https_port);
            let listener = self.bind(tls_addr).await?;
            let port = bound_port(&listener, tls_addr.port());
            listeners.push((listener, Mode::Tls(gate)));
            Some(port)
        } else {
            listeners.push((self.bind(addr).await?, Mode::Plain));
            None
        };

        if let Some(tls_port) = tls_port {
            let enforced = config.security.https_enforced && addr.port() != STANDARD_PLAIN_PORT;
            if enforced || challenge_manager.is_some() {
                let plain = SocketAddr::new(addr.ip(), config.listener.plain_http_port);
                let listener = self.bind(plain).await?;
                if let Ok(bound) = listener.local_addr() {
                    let _ = self.inner.plain_addr.set(bound);
                }
                let policy = RedirectPolicy::new(tls_port, enforced, challenge_manager.clone());
                listeners.push((listener, Mode::Redirect(policy)));
            }
        }

        if let Some((primary, _)) = listeners.first() {
            if let Ok(bound) = primary.local_addr() {
                let _ = self.inner.local_addr.set(bound);
            }
        }

        if let Some(manager) = &challenge_manager {
            let names: Vec<String> = config
                .security
                .host_whitelist
                .iter()
                .map(|h| strip_port(h.trim()).to_ascii_lowercase())
                .filter(|h| !h.is_empty() && !is_ip_literal(h))
                .collect();
            manager.warm_up(&names);
        }

        let loops = listeners
            .into_iter()
            .map(|(listener, mode)| self.accept_loop(listener, mode));
        futures_util::future::join_all(loops).await;
        Ok(())
    }

    /// Serve cleartext HTTP on an already bound socket.
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        let listener = Listener::from_tcp(listener, Arc::clone(&self.inner.limit));
        if let Ok(bound) = listener.local_addr() {
            let _ = self.inner.local_addr.set(bound);
        }
        self.accept_loop(listener, Mode::Plain).await;
        Ok(())
    }

    /// Stop accepting, let in-flight requests finish, then return.
    ///
    /// A zero `timeout` waits indefinitely. Otherwise connections still open
    /// when it elapses are dropped and `ShutdownTimedOut` is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ServerError> {
        tracing::info!(
            timeout_ms = timeout.as_millis() as u64,
            active_connections = self.inner.tracker.active_count(),
            "Shutting down"
        );
        self.inner.shutdown.drain();

        if timeout.is_zero() {
            self.inner.tracker.wait_idle().await;
            return Ok(());
        }

        match tokio::time::timeout(timeout, self.inner.tracker.wait_idle()).await {
            Ok(()) => {
                tracing::info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    active_connections = self.inner.tracker.active_count(),
                    "Shutdown grace period elapsed, closing remaining connections"
                );
                self.close();
                Err(ServerError::ShutdownTimedOut(timeout))
            }
        }
    }

    /// Drop every listener and connection immediately.
    pub fn close(&self) {
        self.inner.shutdown.close();
    }

    fn gate(&self, source: CertificateSource) -> Result<Arc<TlsGate>, ServerError> {
        let provider = CertificateProvider::new(source, self.inner.ctx.host_policy.clone());
        Ok(Arc::new(TlsGate::new(Arc::new(provider))?))
    }

    async fn bind(&self, addr: SocketAddr) -> Result<Listener, ServerError> {
        Ok(Listener::bind(addr, Arc::clone(&self.inner.limit)).await?)
    }

    async fn accept_loop(&self, listener: Listener, mode: Mode) {
        let mut state = self.inner.shutdown.subscribe();
        let address = listener.local_addr().ok();
        tracing::info!(address = ?address, mode = mode.name(), "Accepting connections");

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut state) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr, permit)) => {
                        let guard = self.inner.tracker.track();
                        let server = self.clone();
                        let mode = mode.clone();
                        tokio::spawn(async move {
                            server.serve_connection(stream, remote_addr, mode, guard, permit).await;
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!(address = ?address, "Listener stopped");
    }

    async fn serve_connection(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        mode: Mode,
        guard: ConnectionGuard,
        _permit: ConnectionPermit,
    ) {
        let config = &self.inner.ctx.config;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let deadlines = DeadlineSwitch::new();
        let io = TimedIo::new(stream, config.timeouts.write(), deadlines.clone());
        let mut info = ConnectionInfo {
            id: guard.id(),
            remote_addr,
            tls: false,
            deadlines,
        };

        match mode {
            Mode::Tls(gate) => {
                let mut state = self.inner.shutdown.subscribe();
                let limit = config.timeouts.read_header();
                let handshake = tokio::select! {
                    result = gate.accept(io) => result,
                    _ = sleep_or_pending(limit) => {
                        tracing::debug!(connection_id = %info.id, "TLS handshake timed out");
                        return;
                    }
                    _ = stopped(&mut state) => return,
                };
                match handshake {
                    Ok(Handshake::Established(tls)) => {
                        info.tls = true;
                        self.drive(tls, info, None, false).await;
                    }
                    Ok(Handshake::Rejected(server_name)) => {
                        tracing::debug!(connection_id = %info.id, server_name = ?server_name, "TLS handshake rejected");
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = %info.id, error = %e, "TLS handshake failed");
                    }
                }
            }
            Mode::Plain => self.drive(io, info, None, true).await,
            Mode::Redirect(policy) => self.drive(io, info, Some(policy), true).await,
        }
    }

    /// Run HTTP on an established stream until it ends, idles out, is
    /// refused, or the run stops.
    async fn drive<I>(&self, io: I, info: ConnectionInfo, policy: Option<RedirectPolicy>, gated: bool)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.inner.ctx.config;
        let connection_id: ConnectionId = info.id;
        let activity = ConnectionActivity::new();
        let refused = Arc::new(Notify::new());

        let server = self.clone();
        let service = {
            let activity = activity.clone();
            let refused = Arc::clone(&refused);
            service_fn(move |mut req: http::Request<Incoming>| {
                let server = server.clone();
                let info = info.clone();
                let policy = policy.clone();
                let refused = Arc::clone(&refused);
                let active = activity.begin();
                async move {
                    if gated {
                        let host = redirect::request_host(&req).unwrap_or("");
                        if !server.inner.ctx.host_policy.allows(host) {
                            tracing::debug!(
                                connection_id = %info.id,
                                host = ?req.headers().get(HOST),
                                "Host refused, closing connection"
                            );
                            refused.notify_one();
                            return Err(HostRejected);
                        }
                    }

                    if let Some(policy) = &policy {
                        let action = policy.decide(&req);
                        if action != PlainAction::Dispatch {
                            return Ok(redirect::respond(action));
                        }
                    }

                    req.extensions_mut().insert(info);
                    let response = server.inner.dispatcher.serve(req).await;
                    Ok::<http::Response<ResponseBody>, HostRejected>(response.map(|body| body.hold(active)))
                }
            })
        };

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .max_buf_size(config.max_header_bytes.max(MIN_READ_BUFFER));
        if let Some(limit) = config.timeouts.read_header() {
            builder.http1().header_read_timeout(limit);
        }
        builder
            .http2()
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(config.max_header_bytes).unwrap_or(u32::MAX));

        let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
        tokio::pin!(conn);

        let idle_limit = config.timeouts.idle();
        let mut state = self.inner.shutdown.subscribe();
        let outcome = tokio::select! {
            result = conn.as_mut() => Some(result),
            _ = refused.notified() => None,
            _ = idle(&activity, idle_limit) => {
                tracing::debug!(connection_id = %connection_id, "Connection idle, closing");
                conn.as_mut().graceful_shutdown();
                tokio::select! {
                    result = conn.as_mut() => Some(result),
                    _ = closed(&mut state) => None,
                }
            }
            stop = stopped(&mut state) => match stop {
                ServerState::Closed => None,
                _ => {
                    conn.as_mut().graceful_shutdown();
                    tokio::select! {
                        result = conn.as_mut() => Some(result),
                        _ = closed(&mut state) => None,
                    }
                }
            },
        };

        match outcome {
            Some(Ok(())) => tracing::trace!(connection_id = %connection_id, "Connection finished"),
            Some(Err(e)) => tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error"),
            None => tracing::debug!(connection_id = %connection_id, "Connection dropped"),
        }
    }
}

/// Port a listener actually bound, which differs from the requested one for port 0.
fn bound_port(listener: &Listener, requested: u16) -> u16 {
    listener.local_addr().map_or(requested, |a| a.port())
}

async fn sleep_or_pending(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Resolve once the connection has had no request in flight for `limit`.
async fn idle(activity: &ConnectionActivity, limit: Option<Duration>) {
    match limit {
        Some(limit) => activity.idle_for(limit).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}
