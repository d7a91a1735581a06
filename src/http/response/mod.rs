//! Pooled outbound response and its write state machine.
//!
//! # Responsibilities
//! - Hold status, headers and flags until the head is committed
//! - Commit the head exactly once, then stream body chunks
//! - Provide typed writers (encode.rs), content and file serving (serve.rs),
//!   push hints (push.rs) and protocol upgrades (upgrade.rs)
//!
//! # Data Flow
//! ```text
//! NotStarted ──write_header / first body byte──▶ HeaderCommitted
//!     HeaderCommitted ──write_bytes──▶ BodyStreaming (repeatable)
//! head  → oneshot  → dispatcher builds the hyper response
//! bytes → mpsc     → ResponseBody polled by hyper
//! ```
//!
//! # Design Decisions
//! - All header mutation happens before commit; later changes are not sent
//! - A plain 200 never overrides a status recorded earlier
//! - Write errors after commit leave the response partially sent

mod encode;
mod push;
mod serve;
mod upgrade;

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, LOCATION, CONTENT_LENGTH, SERVER, SET_COOKIE, STRICT_TRANSPORT_SECURITY};
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode, Version};
use hyper::upgrade::OnUpgrade;
use tokio::sync::{mpsc, oneshot};

use crate::http::context::ServerContext;
use crate::http::error::Error;
use crate::net::connection::DeadlineSwitch;
use crate::net::ConnectionInfo;

pub use serve::http_date;

/// Value of the identifying `Server` header.
pub const SERVER_NAME: &str = "Gale";

const HSTS: &str = "max-age=31536000";

/// Committed status line and headers.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Channels to the hyper side of one exchange.
pub(crate) struct Output {
    pub head: Option<oneshot::Sender<ResponseHead>>,
    pub body: mpsc::Sender<Bytes>,
}

type Deferred = Box<dyn FnOnce() + Send + Sync>;

/// An outbound response as seen by handlers.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    written: bool,
    content_length: u64,
    minified: bool,
    gzipped: bool,
    request: Arc<Parts>,
    tls: bool,
    upgrade: Option<OnUpgrade>,
    deadlines: Option<DeadlineSwitch>,
    output: Option<Output>,
    deferred: Vec<Deferred>,
    ctx: Arc<ServerContext>,
}

impl Response {
    pub(crate) fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            written: false,
            content_length: 0,
            minified: false,
            gzipped: false,
            request: Arc::new(http::Request::new(()).into_parts().0),
            tls: false,
            upgrade: None,
            deadlines: None,
            output: None,
            deferred: Vec::new(),
            ctx,
        }
    }

    /// Prepare a pooled instance for a new exchange.
    pub(crate) fn reset(
        &mut self,
        request: Arc<Parts>,
        conn: Option<&ConnectionInfo>,
        upgrade: Option<OnUpgrade>,
        output: Output,
    ) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.written = false;
        self.content_length = 0;
        self.minified = false;
        self.gzipped = false;
        self.request = request;
        self.tls = conn.is_some_and(|c| c.tls);
        self.upgrade = upgrade;
        self.deadlines = conn.map(|c| c.deadlines.clone());
        self.output = Some(output);
        self.deferred.clear();
    }

    /// Drop per-request references before the instance goes back to the pool.
    pub(crate) fn release(&mut self) {
        self.output = None;
        self.upgrade = None;
        self.deadlines = None;
        self.deferred.clear();
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Record the status to send. Has no effect once written.
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.written {
            self.status = status;
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the head has been committed.
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Body bytes handed to the connection so far.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn is_minified(&self) -> bool {
        self.minified
    }

    pub fn is_gzipped(&self) -> bool {
        self.gzipped
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub(crate) fn request_method(&self) -> &Method {
        &self.request.method
    }

    pub(crate) fn request_version(&self) -> Version {
        self.request.version
    }

    pub(crate) fn request_headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    fn request_header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn is_head_request(&self) -> bool {
        self.request.method == Method::HEAD
    }

    fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Commit the head with `status`. Later calls are no-ops.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.written {
            return;
        }

        let status = if status == StatusCode::OK && self.status != StatusCode::OK {
            self.status
        } else {
            status
        };

        let config = &self.ctx.config;
        if config.security.https_enforced
            && self.tls
            && !config.debug_mode
            && !self.headers.contains_key(STRICT_TRANSPORT_SECURITY)
        {
            self.headers
                .insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
        }
        self.headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));

        self.status = status;
        self.written = true;

        if let Some(tx) = self.output.as_mut().and_then(|o| o.head.take()) {
            let head = ResponseHead {
                status,
                headers: self.headers.clone(),
            };
            if tx.send(head).is_err() {
                tracing::debug!(status = status.as_u16(), "Client gone before response head was sent");
            }
        }
        if status == StatusCode::SWITCHING_PROTOCOLS {
            // No body follows a protocol switch.
            self.output = None;
        }
    }

    /// Commit with the recorded status.
    pub fn commit(&mut self) {
        self.write_header(self.status);
    }

    /// Stream a body chunk, committing the head first if needed.
    pub async fn write_bytes(&mut self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        let chunk = chunk.into();
        if !self.written {
            self.commit();
        }
        if chunk.is_empty() || self.is_head_request() || !status_has_body(self.status) {
            return Ok(());
        }

        let Some(output) = self.output.as_ref() else {
            return Err(Error::ConnectionClosed);
        };
        let len = chunk.len() as u64;
        output
            .body
            .send(chunk)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        self.content_length += len;
        Ok(())
    }

    /// Redirect to `url`. A recorded 3xx status is kept, anything else becomes 302.
    pub fn redirect(&mut self, url: &str) -> Result<(), Error> {
        if !self.status.is_redirection() {
            self.status = StatusCode::FOUND;
        }
        let location = HeaderValue::from_str(url)
            .map_err(|_| Error::status_with(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect location"))?;
        self.headers.insert(LOCATION, location);
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        self.commit();
        Ok(())
    }

    /// Append a `Set-Cookie` header.
    pub fn set_cookie(&mut self, cookie: &str) -> Result<(), Error> {
        let value = HeaderValue::from_str(cookie)
            .map_err(|_| Error::status_with(StatusCode::INTERNAL_SERVER_ERROR, "invalid cookie"))?;
        self.headers.append(SET_COOKIE, value);
        Ok(())
    }

    /// Run `action` after the handler chain finishes, whatever its outcome.
    /// Actions run in reverse registration order.
    pub fn defer(&mut self, action: impl FnOnce() + Send + Sync + 'static) {
        self.deferred.push(Box::new(action));
    }

    pub(crate) fn run_deferred(&mut self) {
        for action in self.deferred.drain(..).rev() {
            action();
        }
    }
}

/// Statuses whose responses never carry a body.
fn status_has_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("written", &self.written)
            .field("content_length", &self.content_length)
            .field("minified", &self.minified)
            .field("gzipped", &self.gzipped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::ServerConfig;

    /// A response wired to channels the test holds.
    pub struct Harness {
        pub res: Response,
        pub head: oneshot::Receiver<ResponseHead>,
        pub body: mpsc::Receiver<Bytes>,
    }

    impl Harness {
        pub fn new(config: ServerConfig, request: http::Request<()>) -> Self {
            Self::with_context(ServerContext::with_defaults(config), request, false)
        }

        pub fn with_context(ctx: Arc<ServerContext>, request: http::Request<()>, tls: bool) -> Self {
            let (head_tx, head) = oneshot::channel();
            let (body_tx, body) = mpsc::channel(64);
            let mut res = Response::new(ctx);
            let conn = ConnectionInfo {
                id: crate::net::connection::ConnectionId::new(),
                remote_addr: ([127, 0, 0, 1], 40000).into(),
                tls,
                deadlines: DeadlineSwitch::new(),
            };
            res.reset(
                Arc::new(request.into_parts().0),
                Some(&conn),
                None,
                Output {
                    head: Some(head_tx),
                    body: body_tx,
                },
            );
            Self { res, head, body }
        }

        /// Close the body and collect the committed head plus every chunk.
        pub async fn finish(mut self) -> (ResponseHead, Bytes) {
            self.res.release();
            let head = self.head.await.expect("head committed");
            let mut out = Vec::new();
            while let Some(chunk) = self.body.recv().await {
                out.extend_from_slice(&chunk);
            }
            (head, Bytes::from(out))
        }
    }

    pub fn get(uri: &str) -> http::Request<()> {
        http::Request::get(uri).body(()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::ServerConfig;
    use std::sync::Mutex;

    #[tokio::test]
    async fn header_commits_once() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.write_header(StatusCode::ACCEPTED);
        h.res.write_header(StatusCode::NOT_FOUND);
        h.res.set_status(StatusCode::BAD_GATEWAY);

        assert!(h.res.is_written());
        assert_eq!(h.res.status(), StatusCode::ACCEPTED);
        let (head, _) = h.finish().await;
        assert_eq!(head.status, StatusCode::ACCEPTED);
        assert_eq!(head.headers[SERVER], SERVER_NAME);
    }

    #[tokio::test]
    async fn recorded_status_beats_implicit_ok() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.set_status(StatusCode::CREATED);
        h.res.write_bytes("made").await.unwrap();

        let (head, body) = h.finish().await;
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(body, Bytes::from_static(b"made"));
    }

    #[tokio::test]
    async fn content_length_counts_written_bytes() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.write_bytes("abc").await.unwrap();
        h.res.write_bytes("de").await.unwrap();
        assert_eq!(h.res.content_length(), 5);
    }

    #[tokio::test]
    async fn hsts_only_over_enforced_tls() {
        let mut config = ServerConfig::default();
        config.security.https_enforced = true;
        let ctx = ServerContext::with_defaults(config);

        let mut h = Harness::with_context(Arc::clone(&ctx), get("/"), true);
        h.res.commit();
        let (head, _) = h.finish().await;
        assert_eq!(head.headers[STRICT_TRANSPORT_SECURITY], HSTS);

        let mut h = Harness::with_context(ctx, get("/"), false);
        h.res.commit();
        let (head, _) = h.finish().await;
        assert!(!head.headers.contains_key(STRICT_TRANSPORT_SECURITY));
    }

    #[tokio::test]
    async fn head_requests_send_no_body() {
        let request = http::Request::head("/").body(()).unwrap();
        let mut h = Harness::new(ServerConfig::default(), request);
        h.res.write_bytes("ignored").await.unwrap();
        let (_, body) = h.finish().await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn redirect_keeps_recorded_3xx() {
        let mut h = Harness::new(ServerConfig::default(), get("/old"));
        h.res.set_status(StatusCode::MOVED_PERMANENTLY);
        h.res.redirect("/new").unwrap();
        let (head, _) = h.finish().await;
        assert_eq!(head.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(head.headers[LOCATION], "/new");

        let mut h = Harness::new(ServerConfig::default(), get("/old"));
        h.res.set_status(StatusCode::NOT_FOUND);
        h.res.redirect("/new").unwrap();
        let (head, _) = h.finish().await;
        assert_eq!(head.status, StatusCode::FOUND);
    }

    #[test]
    fn deferred_actions_run_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut res = Response::new(ServerContext::with_defaults(ServerConfig::default()));
        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            res.defer(move || log.lock().unwrap().push(name));
        }
        res.run_deferred();
        res.run_deferred();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
    }
}
