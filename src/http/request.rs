//! Pooled inbound request.
//!
//! # Responsibilities
//! - Expose the request head, body and connection facts to handlers
//! - Hold route parameters set by the router
//! - Lazily parse query parameters and resolve the locale, once per use
//!
//! # Design Decisions
//! - Instances are reused across requests; `reset` replaces every field
//!   that could leak state from the previous use
//! - The head is shared with the paired `Response` through one `Arc`

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::header::{ACCEPT_LANGUAGE, HOST};
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;

use crate::content::Locale;
use crate::http::context::ServerContext;
use crate::http::error::{BoxError, Error};
use crate::net::ConnectionInfo;

/// Boxed inbound body.
pub type RequestBody = BoxBody<Bytes, BoxError>;

/// A decoded query or route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParam {
    pub name: String,
    pub value: String,
}

/// An inbound request as seen by handlers.
pub struct Request {
    head: Arc<Parts>,
    body: Option<RequestBody>,
    remote_addr: Option<SocketAddr>,
    tls: bool,
    route_param_names: Option<Arc<[String]>>,
    route_param_values: Option<Vec<String>>,
    query: OnceLock<Vec<RequestParam>>,
    locale: OnceLock<Locale>,
    ctx: Arc<ServerContext>,
}

impl Request {
    pub(crate) fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            head: Arc::new(empty_head()),
            body: None,
            remote_addr: None,
            tls: false,
            route_param_names: None,
            route_param_values: None,
            query: OnceLock::new(),
            locale: OnceLock::new(),
            ctx,
        }
    }

    /// Prepare a pooled instance for a new request.
    pub(crate) fn reset(&mut self, head: Arc<Parts>, body: RequestBody, conn: Option<&ConnectionInfo>) {
        self.head = head;
        self.body = Some(body);
        self.remote_addr = conn.map(|c| c.remote_addr);
        self.tls = conn.is_some_and(|c| c.tls);
        self.route_param_names = None;
        self.route_param_values = None;
        self.query = OnceLock::new();
        self.locale = OnceLock::new();
    }

    /// Drop per-request references before the instance goes back to the pool.
    pub(crate) fn release(&mut self) {
        self.head = Arc::new(empty_head());
        self.body = None;
        self.route_param_names = None;
        self.route_param_values = None;
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// Raw query string, without the `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.head.uri.query()
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// First value of `name`, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host the client addressed: the `Host` header, or the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.head
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.head.uri.authority().map(|a| a.as_str()))
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the request arrived over TLS.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Record route parameters. Called by routers.
    pub fn set_route_params(&mut self, names: Arc<[String]>, values: Vec<String>) {
        if let Some(old) = self.route_param_values.take() {
            self.ctx.router.recycle_param_values(old);
        }
        self.route_param_names = Some(names);
        self.route_param_values = Some(values);
    }

    pub(crate) fn take_route_param_values(&mut self) -> Option<Vec<String>> {
        self.route_param_names = None;
        self.route_param_values.take()
    }

    /// Route parameters in pattern order.
    pub fn route_params(&self) -> impl Iterator<Item = (&str, &str)> {
        let names = self.route_param_names.as_deref().unwrap_or(&[]);
        let values = self.route_param_values.as_deref().unwrap_or(&[]);
        names
            .iter()
            .zip(values.iter())
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn route_param_count(&self) -> usize {
        self.route_params().count()
    }

    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.route_params().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Decoded query parameters, parsed on first use.
    pub fn query_params(&self) -> &[RequestParam] {
        self.query.get_or_init(|| {
            self.head
                .uri
                .query()
                .map(|q| {
                    url::form_urlencoded::parse(q.as_bytes())
                        .map(|(name, value)| RequestParam {
                            name: name.into_owned(),
                            value: value.into_owned(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Parameter by name: route parameters first, then the query.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route_param(name).or_else(|| {
            self.query_params()
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.as_str())
        })
    }

    /// Take the body. Later calls return `None`.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    /// Collect the whole body. Returns empty bytes once the body was taken.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        match self.body.take() {
            Some(body) => Ok(body.collect().await.map_err(body_error)?.to_bytes()),
            None => Ok(Bytes::new()),
        }
    }

    /// Locale chosen from `Accept-Language`, resolved once per request.
    pub fn locale(&self) -> Locale {
        self.locale
            .get_or_init(|| {
                let accept = self.head.headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok());
                self.ctx.localizer.locale(accept)
            })
            .clone()
    }

    pub fn localized_string(&self, key: &str) -> String {
        self.locale().localize(key)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("remote_addr", &self.remote_addr)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

fn empty_head() -> Parts {
    http::Request::new(()).into_parts().0
}

/// A body read deadline becomes 408; anything else stays opaque.
fn body_error(err: BoxError) -> Error {
    match err.downcast_ref::<std::io::Error>() {
        Some(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            Error::status_with(StatusCode::REQUEST_TIMEOUT, "request body read timed out")
        }
        _ => Error::Other(err),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use http_body_util::{Empty, Full};

    pub fn body(content: &'static str) -> RequestBody {
        if content.is_empty() {
            Empty::new().map_err(|never| match never {}).boxed()
        } else {
            Full::new(Bytes::from_static(content.as_bytes()))
                .map_err(|never| match never {})
                .boxed()
        }
    }

    pub fn request(ctx: &Arc<ServerContext>, head: http::Request<()>) -> Request {
        let mut req = Request::new(Arc::clone(ctx));
        req.reset(Arc::new(head.into_parts().0), body(""), None);
        req
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::ServerConfig;
    use crate::content::MapLocalizer;
    use std::collections::HashMap;

    fn ctx() -> Arc<ServerContext> {
        ServerContext::with_defaults(ServerConfig::default())
    }

    #[test]
    fn route_params_shadow_query() {
        let ctx = ctx();
        let mut req = request(&ctx, http::Request::get("/users/7?id=9&q=a%20b").body(()).unwrap());
        req.set_route_params(Arc::from(vec!["id".to_string()]), vec!["7".to_string()]);

        assert_eq!(req.param("id"), Some("7"));
        assert_eq!(req.param("q"), Some("a b"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.query_params().len(), 2);
    }

    #[test]
    fn reset_clears_previous_use() {
        let ctx = ctx();
        let mut req = request(&ctx, http::Request::get("/a?x=1").body(()).unwrap());
        req.set_route_params(Arc::from(vec!["a".to_string()]), vec!["1".to_string()]);
        assert_eq!(req.param("x"), Some("1"));

        let next = http::Request::get("/b").body(()).unwrap().into_parts().0;
        req.reset(Arc::new(next), body(""), None);
        assert_eq!(req.route_param_count(), 0);
        assert_eq!(req.param("x"), None);
        assert_eq!(req.path(), "/b");
    }

    #[tokio::test]
    async fn body_is_taken_once() {
        let ctx = ctx();
        let mut req = Request::new(Arc::clone(&ctx));
        let head = http::Request::post("/").body(()).unwrap().into_parts().0;
        req.reset(Arc::new(head), body("payload"), None);

        assert_eq!(req.bytes().await.unwrap(), Bytes::from_static(b"payload"));
        assert!(req.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn late_body_is_a_request_timeout() {
        use crate::http::body::TimedBody;
        use http_body::Frame;
        use std::convert::Infallible;
        use std::time::Duration;

        let ctx = ctx();
        let mut req = Request::new(Arc::clone(&ctx));
        let head = http::Request::post("/").body(()).unwrap().into_parts().0;
        let stalled = http_body_util::StreamBody::new(futures_util::stream::pending::<Result<Frame<Bytes>, Infallible>>());
        req.reset(Arc::new(head), TimedBody::new(stalled, Duration::from_millis(20)).boxed(), None);

        let err = req.bytes().await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::REQUEST_TIMEOUT));
    }

    #[test]
    fn locale_follows_accept_language() {
        let localizer = MapLocalizer::new()
            .with_table("fr", HashMap::from([("hi".to_string(), "salut".to_string())]));
        let ctx = ServerContext::builder(ServerConfig::default())
            .localizer(localizer)
            .build();
        let req = request(
            &ctx,
            http::Request::get("/").header("accept-language", "fr-FR").body(()).unwrap(),
        );
        assert_eq!(req.localized_string("hi"), "salut");
        assert_eq!(req.localized_string("bye"), "bye");
    }
}
