//! Behaviour of the secondary plaintext listener.
//!
//! # Responsibilities
//! - Answer HTTP-01 challenges while automatic certificates are active
//! - Send hostname traffic to the HTTPS equivalent URL
//! - Pass IP-literal traffic to the regular (h2c-capable) dispatcher

use std::sync::Arc;

use http::header::{HeaderValue, CONTENT_TYPE, HOST, LOCATION};
use http::StatusCode;

use crate::http::body::ResponseBody;
use crate::net::acme::{CertificateManager, ACME_CHALLENGE_PREFIX};
use crate::security::{is_ip_literal, strip_port};

const DEFAULT_TLS_PORT: u16 = 443;

/// What the plaintext listener does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainAction {
    /// Challenge answer (key authorization), or `None` for an unknown token.
    Challenge(Option<String>),
    /// Permanent redirect to this URL.
    Redirect(String),
    /// Serve through the regular dispatcher.
    Dispatch,
}

/// Routing rules of the secondary listener.
#[derive(Clone)]
pub struct RedirectPolicy {
    tls_port: u16,
    enforced: bool,
    manager: Option<Arc<dyn CertificateManager>>,
}

impl RedirectPolicy {
    /// `enforced` redirects hostname traffic; `manager` answers challenges.
    pub fn new(tls_port: u16, enforced: bool, manager: Option<Arc<dyn CertificateManager>>) -> Self {
        Self {
            tls_port,
            enforced,
            manager,
        }
    }

    pub fn decide<B>(&self, req: &http::Request<B>) -> PlainAction {
        if let Some(manager) = &self.manager {
            if let Some(token) = req.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX) {
                return PlainAction::Challenge(manager.http01_response(token));
            }
        }

        if !self.enforced {
            return PlainAction::Dispatch;
        }
        match request_host(req) {
            Some(host) if !is_ip_literal(host) => {
                PlainAction::Redirect(https_target(host, req.uri(), self.tls_port))
            }
            _ => PlainAction::Dispatch,
        }
    }
}

impl std::fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectPolicy")
            .field("tls_port", &self.tls_port)
            .field("enforced", &self.enforced)
            .field("challenges", &self.manager.is_some())
            .finish()
    }
}

/// Host the client addressed: the `Host` header, or the URI authority.
pub fn request_host<B>(req: &http::Request<B>) -> Option<&str> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// HTTPS URL for the same resource; the port is omitted when it is 443.
pub fn https_target(host: &str, uri: &http::Uri, tls_port: u16) -> String {
    let host = strip_port(host);
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());

    if tls_port == DEFAULT_TLS_PORT {
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}:{}{}", host, tls_port, path_and_query)
    }
}

/// Response for a non-dispatch action.
pub(crate) fn respond(action: PlainAction) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(ResponseBody::empty());
    match action {
        PlainAction::Challenge(Some(key_authorization)) => {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            *response.body_mut() = ResponseBody::full(key_authorization);
        }
        PlainAction::Challenge(None) => {
            *response.status_mut() = StatusCode::NOT_FOUND;
        }
        PlainAction::Redirect(target) => match HeaderValue::from_str(&target) {
            Ok(location) => {
                *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
                response.headers_mut().insert(LOCATION, location);
            }
            Err(_) => {
                *response.status_mut() = StatusCode::BAD_REQUEST;
            }
        },
        PlainAction::Dispatch => {
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::acme::DirCacheManager;

    fn request(host: &str, uri: &str) -> http::Request<()> {
        http::Request::get(uri).header(HOST, host).body(()).unwrap()
    }

    #[test]
    fn target_keeps_path_and_query() {
        let uri: http::Uri = "/a/b?c=d".parse().unwrap();
        assert_eq!(https_target("example.com:80", &uri, 443), "https://example.com/a/b?c=d");
        assert_eq!(https_target("example.com", &uri, 8443), "https://example.com:8443/a/b?c=d");
    }

    #[test]
    fn hostnames_redirect_and_ips_pass_through() {
        let policy = RedirectPolicy::new(8443, true, None);
        assert_eq!(
            policy.decide(&request("Example.com", "/x")),
            PlainAction::Redirect("https://Example.com:8443/x".to_string())
        );
        assert_eq!(policy.decide(&request("127.0.0.1:80", "/x")), PlainAction::Dispatch);
        assert_eq!(policy.decide(&request("[::1]:80", "/x")), PlainAction::Dispatch);
    }

    #[test]
    fn unenforced_policy_dispatches() {
        let policy = RedirectPolicy::new(443, false, None);
        assert_eq!(policy.decide(&request("example.com", "/")), PlainAction::Dispatch);
    }

    #[test]
    fn challenges_are_answered_from_the_manager() {
        let manager = Arc::new(DirCacheManager::new("acme-certs"));
        manager.register_challenge("tok", "tok.thumbprint");
        let policy = RedirectPolicy::new(443, true, Some(manager as Arc<dyn CertificateManager>));

        let known = format!("{}tok", ACME_CHALLENGE_PREFIX);
        assert_eq!(
            policy.decide(&request("example.com", &known)),
            PlainAction::Challenge(Some("tok.thumbprint".to_string()))
        );
        let unknown = format!("{}other", ACME_CHALLENGE_PREFIX);
        assert_eq!(
            policy.decide(&request("example.com", &unknown)),
            PlainAction::Challenge(None)
        );

        let response = respond(PlainAction::Challenge(None));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
