//! Per-request lifecycle: pooled objects in, pipeline, error handling,
//! deferred actions, pooled objects out.
//!
//! # Data Flow
//! ```text
//! hyper request
//!     → serve(): split head/body, arm the body read deadline,
//!       spawn lifecycle, await committed head
//!     → lifecycle task:
//!         acquire Request + Response from pools, reset
//!         pipeline (pregases → route → gases → handler)
//!         Err → escalate status → ErrorHandler
//!         commit if nothing was written
//!         deferred actions (LIFO)
//!         route param values → router
//!         release both objects to their pools
//!     ← head + streamed body
//! ```
//!
//! # Design Decisions
//! - The lifecycle runs in its own task so the head can be returned to hyper
//!   while the handler keeps streaming the body
//! - A lifecycle that dies before committing yields an empty 500

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::UPGRADE;
use http::StatusCode;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::{mpsc, oneshot};

use crate::http::body::{ResponseBody, TimedBody};
use crate::http::context::ServerContext;
use crate::http::error::BoxError;
use crate::http::pipeline::Pipeline;
use crate::http::pool::Pool;
use crate::http::request::{Request, RequestBody};
use crate::http::response::{Output, Response};
use crate::net::ConnectionInfo;

/// Chunks buffered between a handler and the connection.
const BODY_CHANNEL_DEPTH: usize = 16;

const MAX_POOLED: usize = 1024;

/// Runs requests through the pipeline with pooled request objects.
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    pipeline: Pipeline,
    requests: Pool<Request>,
    responses: Pool<Response>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Arc<Self> {
        let capacity = ctx.config.listener.max_connections.clamp(1, MAX_POOLED);
        let pipeline = Pipeline::new(Arc::clone(&ctx.router), &ctx.pregases, &ctx.gases);

        let request_ctx = Arc::clone(&ctx);
        let response_ctx = Arc::clone(&ctx);
        Arc::new(Self {
            pipeline,
            requests: Pool::new(capacity, move || Request::new(Arc::clone(&request_ctx))),
            responses: Pool::new(capacity, move || Response::new(Arc::clone(&response_ctx))),
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Serve one request. Resolves once the response head is committed.
    pub async fn serve<B>(self: &Arc<Self>, mut req: http::Request<B>) -> http::Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let conn = req.extensions_mut().remove::<ConnectionInfo>();
        let upgrade = req
            .headers()
            .contains_key(UPGRADE)
            .then(|| hyper::upgrade::on(&mut req));

        let (head, body) = req.into_parts();
        let body: RequestBody = body.map_err(|e| -> BoxError { e.into() }).boxed();
        let body = match self.ctx.config.timeouts.read() {
            Some(limit) => TimedBody::new(body, limit).boxed(),
            None => body,
        };

        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
        let output = Output {
            head: Some(head_tx),
            body: body_tx,
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.lifecycle(Arc::new(head), body, conn, upgrade, output).await;
        });

        match head_rx.await {
            Ok(head) => {
                let body = if head.status == StatusCode::SWITCHING_PROTOCOLS {
                    ResponseBody::empty()
                } else {
                    ResponseBody::channel(body_rx)
                };
                let mut response = http::Response::new(body);
                *response.status_mut() = head.status;
                *response.headers_mut() = head.headers;
                response
            }
            Err(_) => {
                tracing::error!("Request lifecycle ended without a response head");
                let mut response = http::Response::new(ResponseBody::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    async fn lifecycle(
        &self,
        head: Arc<http::request::Parts>,
        body: RequestBody,
        conn: Option<ConnectionInfo>,
        upgrade: Option<hyper::upgrade::OnUpgrade>,
        output: Output,
    ) {
        let started = Instant::now();
        let mut req = self.requests.acquire();
        let mut res = self.responses.acquire();
        req.reset(Arc::clone(&head), body, conn.as_ref());
        res.reset(head, conn.as_ref(), upgrade, output);

        if let Err(err) = self.pipeline.handler().call(&mut *req, &mut *res).await {
            if !res.is_written() && res.status() < StatusCode::BAD_REQUEST {
                res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            self.ctx.error_handler.handle(err, &mut *req, &mut *res).await;
        }
        if !res.is_written() {
            res.commit();
        }
        res.run_deferred();

        if let Some(values) = req.take_route_param_values() {
            self.ctx.router.recycle_param_values(values);
        }

        tracing::debug!(
            connection_id = conn.as_ref().map(|c| c.id.as_u64()),
            method = %req.method(),
            path = %req.path(),
            status = res.status().as_u16(),
            bytes = res.content_length(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );

        req.release();
        res.release();
        self.requests.release(req);
        self.responses.release(res);
    }

    /// Request objects built because the pool was empty.
    pub fn requests_created(&self) -> u64 {
        self.requests.created()
    }

    /// Request objects served from the pool.
    pub fn requests_reused(&self) -> u64 {
        self.requests.reused()
    }

    pub fn responses_idle(&self) -> usize {
        self.responses.idle()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("requests_idle", &self.requests.idle())
            .field("responses_idle", &self.responses.idle())
            .finish_non_exhaustive()
    }
}
