//! Middleware composition around route resolution.
//!
//! # Data Flow
//! ```text
//! pregas[0] → … → pregas[n] → route stage
//!     route stage: router.route(req)
//!         → gas[0] → … → gas[m] → finalize(matched handler)
//! ```
//!
//! # Design Decisions
//! - The pre-route chain is composed once; post-route gases wrap whatever
//!   handler the router picked, so they are composed per request
//! - Finalize sits directly around the matched handler: a silent success
//!   becomes 204, an error escalates the status to 500 unless it is already
//!   4xx or higher

use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;

use crate::http::error::Error;
use crate::http::handler::{BoxedHandler, Gas, Handler, HandlerFuture};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::routing::Router;

/// Composed middleware chain.
#[derive(Clone)]
pub struct Pipeline {
    chain: BoxedHandler,
}

impl Pipeline {
    pub fn new(router: Arc<dyn Router>, pregases: &[Gas], gases: &[Gas]) -> Self {
        let route: BoxedHandler = Arc::new(RouteStage {
            router,
            gases: gases.to_vec(),
        });
        let chain = pregases.iter().rev().fold(route, |inner, gas| gas(inner));
        Self { chain }
    }

    /// Outermost handler of the chain.
    pub fn handler(&self) -> &BoxedHandler {
        &self.chain
    }
}

struct RouteStage {
    router: Arc<dyn Router>,
    gases: Vec<Gas>,
}

impl Handler for RouteStage {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            let matched: BoxedHandler = Arc::new(Finalize(self.router.route(req)));
            let inner = self.gases.iter().rev().fold(matched, |inner, gas| gas(inner));
            inner.call(req, res).await
        })
    }
}

struct Finalize(BoxedHandler);

impl Handler for Finalize {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move {
            let outcome = self.0.call(req, res).await;
            if res.is_written() {
                return outcome;
            }

            match outcome {
                Ok(()) => {
                    res.set_status(StatusCode::NO_CONTENT);
                    res.headers_mut().remove(CONTENT_TYPE);
                    res.headers_mut().remove(CONTENT_LENGTH);
                    res.write_header(StatusCode::NO_CONTENT);
                    Ok(())
                }
                Err(err) => {
                    if res.status() < StatusCode::BAD_REQUEST {
                        res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                    Err(err)
                }
            }
        })
    }
}

/// Produces a response for an error that escaped the chain.
pub trait ErrorHandler: Send + Sync {
    fn handle<'a>(&'a self, err: Error, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, ()>;
}

/// Writes the status text (or the error in debug mode) as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle<'a>(&'a self, err: Error, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if res.is_written() {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.path(),
                    error = %err,
                    "Request failed after response was committed"
                );
                return;
            }

            if let Some(status) = err.status() {
                res.set_status(status);
            }
            let status = res.status();

            if status.is_server_error() {
                tracing::error!(method = %req.method(), path = %req.path(), status = status.as_u16(), error = %err, "Request failed");
            } else {
                tracing::debug!(method = %req.method(), path = %req.path(), status = status.as_u16(), error = %err, "Request rejected");
            }

            let message = if res.context().config.debug_mode {
                err.to_string()
            } else {
                status.canonical_reason().unwrap_or("Error").to_string()
            };

            if let Err(e) = res.write_string(&message).await {
                tracing::debug!(error = %e, "Failed to write error response");
            }
        })
    }
}
