//! Errors raised by handlers and the response write path.

use std::io;

use http::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::content::{MinifyError, RenderError};

/// Boxed error used for encoder and collaborator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by handlers, middleware and response writers.
#[derive(Debug, Error)]
pub enum Error {
    /// Error with an explicit HTTP status for the error handler to honour.
    #[error("{1}")]
    Status(StatusCode, String),

    /// The connection cannot carry pushed resources.
    #[error("server push is not supported on this connection")]
    PushNotSupported,

    #[error("invalid push target: {0}")]
    InvalidPushTarget(String),

    #[error("minify: {0}")]
    Minify(#[from] MinifyError),

    #[error("encode: {0}")]
    Encode(BoxError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    /// Protocol upgrade refused before the response was committed.
    #[error("upgrade refused: {1}")]
    Upgrade(StatusCode, String),

    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The client went away while the body was streaming.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(BoxError),
}

impl Error {
    /// Error carrying `status` and a message.
    pub fn status_with(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status(status, message.into())
    }

    /// Wrap any error as `Other`.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// HTTP status this error implies, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status, _) | Self::Upgrade(status, _) => Some(*status),
            Self::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => Some(StatusCode::NOT_FOUND),
                io::ErrorKind::PermissionDenied => Some(StatusCode::FORBIDDEN),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_file_statuses() {
        let missing = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(missing.status(), Some(StatusCode::NOT_FOUND));

        let denied = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.status(), Some(StatusCode::FORBIDDEN));

        let reset = Error::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.status(), None);
    }

    #[test]
    fn explicit_status_is_reported() {
        let err = Error::status_with(StatusCode::IM_A_TEAPOT, "short and stout");
        assert_eq!(err.status(), Some(StatusCode::IM_A_TEAPOT));
        assert_eq!(err.to_string(), "short and stout");
        assert_eq!(Error::other("boom").status(), None);
    }
}
