//! Resource push hints for HTTP/2 clients.
//!
//! hyper exposes no `PUSH_PROMISE` API, so a push is announced as a
//! `Link: <target>; rel=preload` header that clients and intermediaries
//! act on.

use http::header::{HeaderValue, HOST, LINK};
use http::Version;
use url::Url;

use crate::http::error::Error;
use crate::http::response::Response;

impl Response {
    /// Announce `target` for push.
    ///
    /// Fails with [`Error::PushNotSupported`] unless the exchange is HTTP/2
    /// and the head is still pending.
    pub fn push(&mut self, target: &str) -> Result<(), Error> {
        if self.request_version() != Version::HTTP_2 || self.written {
            return Err(Error::PushNotSupported);
        }
        if !self.is_pushable(target) {
            return Err(Error::InvalidPushTarget(target.to_string()));
        }

        let value = HeaderValue::from_str(&format!("<{}>; rel=preload", target))
            .map_err(|_| Error::InvalidPushTarget(target.to_string()))?;
        self.headers.append(LINK, value);
        Ok(())
    }

    /// Absolute paths, or absolute URLs on this request's origin.
    fn is_pushable(&self, target: &str) -> bool {
        if target.starts_with('/') {
            return !target.starts_with("//");
        }

        let Ok(url) = Url::parse(target) else {
            return false;
        };
        let scheme = if self.tls { "https" } else { "http" };
        let authority = self
            .request_header(HOST)
            .or_else(|| self.request.uri.authority().map(|a| a.as_str()));

        let target_authority = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return false,
        };

        url.scheme() == scheme && authority.is_some_and(|a| a.eq_ignore_ascii_case(&target_authority))
    }
}

/// Same-origin absolute paths referenced by `<link href>`, `<script src>`
/// and `<img src>` in `html`, in document order and without duplicates.
pub(super) fn linked_resources(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(offset) = lower[cursor..].find('<') {
        let start = cursor + offset + 1;
        let end = match lower[start..].find('>') {
            Some(end) => start + end,
            None => break,
        };
        let tag = &lower[start..end];
        let original = &html[start..end];
        cursor = end + 1;

        let attribute = if tag.starts_with("link") && tag[4..].starts_with(char::is_whitespace) {
            "href"
        } else if (tag.starts_with("script") && tag[6..].starts_with(char::is_whitespace))
            || (tag.starts_with("img") && tag[3..].starts_with(char::is_whitespace))
        {
            "src"
        } else {
            continue;
        };

        if let Some(value) = attribute_value(tag, original, attribute) {
            if value.starts_with('/') && !value.starts_with("//") && !found.iter().any(|f| f == value) {
                found.push(value.to_string());
            }
        }
    }

    found
}

/// Value of `name` inside a tag; `lower` and `original` are the same slice
/// in lowercase and original case.
fn attribute_value<'a>(lower: &str, original: &'a str, name: &str) -> Option<&'a str> {
    let mut search = 0;
    while let Some(pos) = lower[search..].find(name) {
        let at = search + pos;
        search = at + name.len();

        let preceded = lower[..at].ends_with(char::is_whitespace);
        let rest = lower[search..].trim_start();
        if !preceded || !rest.starts_with('=') {
            continue;
        }

        let value_start = lower.len() - rest.len() + 1;
        let value = original[value_start..].trim_start();
        let value_offset = original.len() - value.len();
        return match value.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &original[value_offset + 1..];
                inner.find(quote).map(|end| &inner[..end])
            }
            Some(_) => {
                let end = value.find(char::is_whitespace).unwrap_or(value.len());
                Some(&value[..end])
            }
            None => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::http::context::ServerContext;
    use crate::http::response::test_support::{get, Harness};

    fn h2(uri: &str) -> http::Request<()> {
        http::Request::get(uri)
            .version(Version::HTTP_2)
            .header(HOST, "example.com")
            .body(())
            .unwrap()
    }

    #[test]
    fn push_requires_http2() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        assert!(matches!(h.res.push("/app.css"), Err(Error::PushNotSupported)));
        assert!(!h.res.headers().contains_key(LINK));
    }

    #[tokio::test]
    async fn push_after_commit_is_refused() {
        let mut h = Harness::new(ServerConfig::default(), h2("/"));
        h.res.commit();
        assert!(matches!(h.res.push("/app.css"), Err(Error::PushNotSupported)));
    }

    #[test]
    fn push_adds_preload_links() {
        let mut h = Harness::new(ServerConfig::default(), h2("/"));
        h.res.push("/app.css").unwrap();
        h.res.push("http://example.com/app.js").unwrap();

        let links: Vec<_> = h.res.headers().get_all(LINK).iter().collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], "</app.css>; rel=preload");
    }

    #[test]
    fn foreign_targets_are_rejected() {
        let ctx = ServerContext::with_defaults(ServerConfig::default());
        let mut h = Harness::with_context(ctx, h2("/"), true);
        for target in ["//cdn.example.com/x.js", "http://example.com/x.js", "https://other.com/x.js", "x.js"] {
            assert!(
                matches!(h.res.push(target), Err(Error::InvalidPushTarget(_))),
                "{target} should be rejected"
            );
        }
        h.res.push("https://example.com/x.js").unwrap();
    }

    #[test]
    fn finds_linked_resources() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <LINK href='/print.css' media=print>
            <script src="/app.js"></script>
            <script src="https://cdn.example.com/lib.js"></script>
        </head><body><img alt=x src=/logo.png><img src="/logo.png"><a href="/about">a</a></body></html>"#;

        assert_eq!(linked_resources(html), vec!["/style.css", "/print.css", "/app.js", "/logo.png"]);
    }
}
