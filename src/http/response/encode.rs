//! Blob path and typed encoders.

use std::future::Future;
use std::io::{Cursor, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY};
use serde::Serialize;
use serde_json::Value;

use crate::content::{is_compressible, mime_essence, Locale, TemplateData, INHERITED_HTML_KEY};
use crate::http::error::Error;
use crate::http::request::Request;
use crate::http::response::Response;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

impl Response {
    /// Write `content`, minified by its Content-Type and gzipped when worthwhile.
    pub async fn write_blob(&mut self, content: impl Into<Bytes>) -> Result<(), Error> {
        let mut content = content.into();
        let essence = self.header(CONTENT_TYPE).map(mime_essence);
        let ctx = Arc::clone(&self.ctx);
        let config = &ctx.config.content;

        if let Some(essence) = essence.as_deref().filter(|_| config.minifier_enabled) {
            let registered = ctx.minifier.supports(essence);
            content = ctx.minifier.minify(essence, content)?;
            self.minified = registered;
        }

        if !self.written
            && config.gzip_enabled
            && content.len() >= config.gzip_min_length
            && essence.as_deref().is_some_and(is_compressible)
            && !self.headers.contains_key(CONTENT_ENCODING)
            && accepts_gzip(self.request_header(ACCEPT_ENCODING))
        {
            let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), Compression::default());
            encoder.write_all(&content)?;
            content = Bytes::from(encoder.finish()?);
            self.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            self.headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
            self.gzipped = true;
        }

        self.write_content(Cursor::new(content)).await
    }

    /// Write `text` as `text/plain`.
    pub async fn write_string(&mut self, text: &str) -> Result<(), Error> {
        self.set_content_type("text/plain; charset=utf-8");
        self.write_blob(Bytes::copy_from_slice(text.as_bytes())).await
    }

    /// Write `value` as JSON, pretty-printed in debug mode.
    pub async fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let encoded = if self.ctx.config.debug_mode {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|e| Error::Encode(e.into()))?;

        self.set_content_type("application/json; charset=utf-8");
        self.write_blob(encoded).await
    }

    /// Write `value` as an XML document.
    pub async fn write_xml<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let mut document = String::from(XML_DECLARATION);
        if self.ctx.config.debug_mode {
            let mut serializer = quick_xml::se::Serializer::new(&mut document);
            serializer.indent('\t', 1);
            value.serialize(serializer).map_err(|e| Error::Encode(e.into()))?;
        } else {
            let body = quick_xml::se::to_string(value).map_err(|e| Error::Encode(e.into()))?;
            document.push_str(&body);
        }

        self.set_content_type("application/xml; charset=utf-8");
        self.write_blob(document).await
    }

    /// Write `value` as MessagePack with named fields.
    pub async fn write_msgpack<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let encoded = rmp_serde::to_vec_named(value).map_err(|e| Error::Encode(e.into()))?;
        self.set_content_type("application/msgpack");
        self.write_blob(encoded).await
    }

    /// Write a protocol buffers message.
    pub async fn write_protobuf<M: prost::Message>(&mut self, message: &M) -> Result<(), Error> {
        let encoded = message.encode_to_vec();
        self.set_content_type("application/protobuf");
        self.write_blob(encoded).await
    }

    /// Write `value` as TOML, pretty-printed in debug mode.
    pub async fn write_toml<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let encoded = if self.ctx.config.debug_mode {
            toml::to_string_pretty(value)
        } else {
            toml::to_string(value)
        }
        .map_err(|e| Error::Encode(e.into()))?;

        self.set_content_type("application/toml; charset=utf-8");
        self.write_blob(encoded).await
    }

    /// Write an HTML document, pushing linked resources first when enabled.
    pub async fn write_html(&mut self, html: impl Into<String>) -> Result<(), Error> {
        let html = html.into();
        if self.ctx.config.content.auto_push_enabled && self.request_version() == http::Version::HTTP_2 {
            for target in super::push::linked_resources(&html) {
                if let Err(e) = self.push(&target) {
                    tracing::debug!(target = %target, error = %e, "Skipping push");
                }
            }
        }

        self.set_content_type("text/html; charset=utf-8");
        self.write_blob(html).await
    }

    /// Render `templates` in order and write the last result as HTML.
    ///
    /// Each template sees the previous one's output under `InheritedHTML`.
    pub fn render<'a>(
        &'a mut self,
        req: &Request,
        data: TemplateData,
        templates: &[&str],
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a {
        let rendered = self.render_to_string(&req.locale(), data, templates);
        async move { self.write_html(rendered?).await }
    }

    fn render_to_string(&self, locale: &Locale, mut data: TemplateData, templates: &[&str]) -> Result<String, Error> {
        let mut html = String::new();
        for template in templates {
            data.insert(INHERITED_HTML_KEY.to_string(), Value::String(std::mem::take(&mut html)));
            self.ctx.renderer.render(&mut html, template, &data, locale)?;
        }
        Ok(html)
    }

    fn set_content_type(&mut self, value: &'static str) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
}

/// Whether an `Accept-Encoding` value admits gzip.
fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    let Some(header) = accept_encoding else {
        return false;
    };
    header.split(',').any(|part| {
        let mut pieces = part.split(';');
        let coding = pieces.next().unwrap_or("").trim();
        let quality = pieces
            .find_map(|p| p.trim().strip_prefix("q="))
            .and_then(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        (coding.eq_ignore_ascii_case("gzip") || coding == "*") && quality > 0.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::content::TemplateRenderer;
    use crate::http::context::ServerContext;
    use crate::http::response::test_support::{get, Harness};
    use http::StatusCode;
    use serde::Deserialize;
    use std::io::Read;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[tokio::test]
    async fn plain_text_passes_through_untouched() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        let input = "  spaced   out \n\n text ";
        h.res.write_string(input).await.unwrap();
        assert!(!h.res.is_minified());

        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body, Bytes::from_static(input.as_bytes()));
    }

    #[tokio::test]
    async fn html_is_minified() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        let input = "<html>\n    <body>\n        <p>hi</p>\n    </body>\n</html>\n";
        h.res.write_html(input).await.unwrap();
        assert!(h.res.is_minified());

        let (_, body) = h.finish().await;
        assert!(body.len() < input.len());
    }

    #[tokio::test]
    async fn json_is_pretty_in_debug_mode() {
        let mut config = ServerConfig::default();
        config.content.minifier_enabled = false;
        config.debug_mode = true;
        let mut h = Harness::new(config, get("/"));
        h.res.write_json(&Point { x: 1, y: 2 }).await.unwrap();

        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_TYPE], "application/json; charset=utf-8");
        assert!(std::str::from_utf8(&body).unwrap().contains('\n'));
        assert_eq!(serde_json::from_slice::<Point>(&body).unwrap(), Point { x: 1, y: 2 });
    }

    #[tokio::test]
    async fn typed_encoders_set_content_types() {
        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.write_msgpack(&Point { x: 3, y: 4 }).await.unwrap();
        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_TYPE], "application/msgpack");
        assert_eq!(rmp_serde::from_slice::<Point>(&body).unwrap(), Point { x: 3, y: 4 });

        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.write_toml(&Point { x: 5, y: 6 }).await.unwrap();
        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_TYPE], "application/toml; charset=utf-8");
        assert_eq!(toml::from_str::<Point>(std::str::from_utf8(&body).unwrap()).unwrap(), Point { x: 5, y: 6 });

        let mut h = Harness::new(ServerConfig::default(), get("/"));
        h.res.write_xml(&Point { x: 7, y: 8 }).await.unwrap();
        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_TYPE], "application/xml; charset=utf-8");
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("<x>7</x>"));
    }

    #[tokio::test]
    async fn gzip_when_accepted_and_large_enough() {
        let mut config = ServerConfig::default();
        config.content.gzip_enabled = true;
        config.content.gzip_min_length = 16;
        let request = http::Request::get("/")
            .header(ACCEPT_ENCODING, "br, gzip;q=0.8")
            .body(())
            .unwrap();
        let mut h = Harness::new(config, request);
        let text = "repeat ".repeat(50);
        h.res.write_string(&text).await.unwrap();
        assert!(h.res.is_gzipped());

        let (head, body) = h.finish().await;
        assert_eq!(head.headers[CONTENT_ENCODING], "gzip");
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[tokio::test]
    async fn render_layers_templates() {
        let renderer = TemplateRenderer::new()
            .with_template("page", "<p>{{name}}</p>")
            .with_template("layout", "<main>{{InheritedHTML}}</main>");
        let ctx = ServerContext::builder(ServerConfig::default())
            .renderer(renderer)
            .build();
        let req = crate::http::request::test_support::request(&ctx, get("/"));
        let mut h = Harness::with_context(Arc::clone(&ctx), get("/"), false);

        let data = TemplateData::from([("name".to_string(), Value::from("<gale>"))]);
        h.res.render(&req, data, &["page", "layout"]).await.unwrap();

        let (head, body) = h.finish().await;
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"<main><p>&lt;gale&gt;</p></main>"));
    }

    #[test]
    fn gzip_acceptance() {
        assert!(accepts_gzip(Some("gzip, deflate")));
        assert!(accepts_gzip(Some("*")));
        assert!(!accepts_gzip(Some("gzip;q=0")));
        assert!(!accepts_gzip(Some("br")));
        assert!(!accepts_gzip(None));
    }
}
