//! Upgraded WebSocket connection with overridable control-frame handlers.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::http::error::Error;

type Stream = WebSocketStream<TokioIo<Upgraded>>;

/// Called with the peer's close frame, if it sent one.
pub type CloseHandler = Box<dyn FnMut(Option<&CloseFrame>) + Send>;

/// Called with a control frame's payload.
pub type ControlHandler = Box<dyn FnMut(&Bytes) + Send>;

/// A data message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Binary(Bytes),
}

/// Server side of an upgraded connection.
///
/// Control frames are handled inside [`WebSocket::receive`]. By default a
/// ping is answered with a pong, a pong is ignored, and a close is answered
/// with a courtesy close frame.
pub struct WebSocket {
    stream: Stream,
    subprotocol: Option<String>,
    closed: bool,
    close_handler: Option<CloseHandler>,
    ping_handler: Option<ControlHandler>,
    pong_handler: Option<ControlHandler>,
}

impl WebSocket {
    pub(crate) fn new(stream: Stream, subprotocol: Option<String>) -> Self {
        Self {
            stream,
            subprotocol,
            closed: false,
            close_handler: None,
            ping_handler: None,
            pong_handler: None,
        }
    }

    /// Negotiated subprotocol.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// Replace the default close behaviour. The courtesy close frame is
    /// still queued by the protocol layer.
    pub fn on_close(&mut self, handler: impl FnMut(Option<&CloseFrame>) + Send + 'static) {
        self.close_handler = Some(Box::new(handler));
    }

    /// Observe pings. The pong reply is still sent.
    pub fn on_ping(&mut self, handler: impl FnMut(&Bytes) + Send + 'static) {
        self.ping_handler = Some(Box::new(handler));
    }

    pub fn on_pong(&mut self, handler: impl FnMut(&Bytes) + Send + 'static) {
        self.pong_handler = Some(Box::new(handler));
    }

    /// Next data message, or `None` once the connection is closed.
    pub async fn receive(&mut self) -> Result<Option<Incoming>, Error> {
        while !self.closed {
            let Some(message) = self.stream.next().await else {
                self.closed = true;
                break;
            };

            match message {
                Ok(Message::Text(text)) => return Ok(Some(Incoming::Text(text.as_str().to_string()))),
                Ok(Message::Binary(data)) => return Ok(Some(Incoming::Binary(data))),
                Ok(Message::Ping(payload)) => {
                    if let Some(handler) = self.ping_handler.as_mut() {
                        handler(&payload);
                    }
                    // The pong is queued on read; flushing sends it.
                    match self.stream.flush().await {
                        Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(Message::Pong(payload)) => {
                    if let Some(handler) = self.pong_handler.as_mut() {
                        handler(&payload);
                    }
                }
                Ok(Message::Close(frame)) => {
                    self.closed = true;
                    match self.close_handler.as_mut() {
                        Some(handler) => handler(frame.as_ref()),
                        None => {
                            let _ = self.stream.close(None).await;
                        }
                    }
                }
                Ok(Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Error> {
        self.send(Message::text(text.into())).await
    }

    pub async fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<(), Error> {
        self.send(Message::binary(data.into())).await
    }

    async fn send(&mut self, message: Message) -> Result<(), Error> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.stream.send(message).await?;
        Ok(())
    }

    /// Send a close frame and stop receiving.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("subprotocol", &self.subprotocol)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
