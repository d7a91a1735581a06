//! WebSocket upgrade of an HTTP/1.1 exchange.

use std::io;

use http::header::{
    HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::http::error::Error;
use crate::http::response::Response;
use crate::http::websocket::WebSocket;

impl Response {
    /// Switch this exchange to the WebSocket protocol.
    ///
    /// A refused handshake records its status and leaves the response
    /// unwritten, so the error handler can still answer. Once the switch
    /// happens the connection's write deadline no longer applies.
    pub async fn websocket(&mut self) -> Result<WebSocket, Error> {
        if self.written {
            return Err(self.refuse(StatusCode::INTERNAL_SERVER_ERROR, "response already written"));
        }
        if *self.request_method() != Method::GET {
            return Err(self.refuse(StatusCode::METHOD_NOT_ALLOWED, "websocket requires GET"));
        }
        if !self.request_has_token(CONNECTION, "upgrade") || !self.request_has_token(UPGRADE, "websocket") {
            return Err(self.refuse(StatusCode::BAD_REQUEST, "not a websocket handshake"));
        }
        if self.request_header(SEC_WEBSOCKET_VERSION).map(str::trim) != Some("13") {
            return Err(self.refuse(StatusCode::BAD_REQUEST, "unsupported websocket version"));
        }
        let Some(key) = self.request_header(SEC_WEBSOCKET_KEY).map(|k| k.trim().to_string()) else {
            return Err(self.refuse(StatusCode::BAD_REQUEST, "missing websocket key"));
        };
        let Some(on_upgrade) = self.upgrade.take() else {
            return Err(self.refuse(StatusCode::INTERNAL_SERVER_ERROR, "connection cannot be upgraded"));
        };

        let offered = self.request_header(SEC_WEBSOCKET_PROTOCOL).unwrap_or("");
        let subprotocol = offered
            .split(',')
            .map(str::trim)
            .find(|p| self.ctx.config.websocket.subprotocols.iter().any(|s| s == p))
            .map(str::to_string);

        self.headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        self.headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        let accept = HeaderValue::from_str(&derive_accept_key(key.as_bytes())).map_err(Error::other)?;
        self.headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        if let Some(protocol) = &subprotocol {
            let value = HeaderValue::from_str(protocol).map_err(Error::other)?;
            self.headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        self.write_header(StatusCode::SWITCHING_PROTOCOLS);

        let upgraded = match self.ctx.config.websocket.handshake_timeout() {
            Some(limit) => tokio::time::timeout(limit, on_upgrade)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "websocket handoff timed out"))?,
            None => on_upgrade.await,
        }
        .map_err(Error::other)?;

        if let Some(deadlines) = &self.deadlines {
            deadlines.disable();
        }

        let stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        tracing::debug!(subprotocol = ?subprotocol, "WebSocket established");
        Ok(WebSocket::new(stream, subprotocol))
    }

    fn refuse(&mut self, status: StatusCode, message: &str) -> Error {
        self.status = status;
        Error::Upgrade(status, message.to_string())
    }

    fn request_has_token(&self, name: http::header::HeaderName, token: &str) -> bool {
        self.request_headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }
}
