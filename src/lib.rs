//! Gale: the request-serving core of a small HTTP framework.
//!
//! A [`Server`] owns the listener topology (plaintext, static TLS or
//! automatic TLS), and a [`Dispatcher`](http::Dispatcher) runs every request
//! through pooled request objects and the two-stage middleware pipeline.
//! Everything a run needs lives in one immutable [`ServerContext`].

pub mod config;
pub mod content;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::ServerConfig;
pub use http::{Request, Response, Server, ServerContext, ServerError};
pub use lifecycle::Shutdown;
