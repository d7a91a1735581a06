//! Handler and middleware function types.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::error::Error;
use crate::http::request::Request;
use crate::http::response::Response;

/// Future returned by handlers.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), Error>>;

/// Serves one request by mutating its response.
///
/// Both halves are borrowed for the duration of the call; the pair belongs
/// to the dispatcher and returns to its pool afterwards.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a>;
}

/// Shared handler trait object.
pub type BoxedHandler = Arc<dyn Handler>;

/// Middleware: wraps a handler in another handler.
pub type Gas = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        (self.0)(req, res)
    }
}

/// Build a handler from a closure returning a boxed future.
///
/// ```ignore
/// let hello = handler_fn(|_req, res| Box::pin(async move { res.write_string("hi").await }));
/// ```
pub fn handler_fn<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

struct GasFn<F> {
    f: Arc<F>,
    next: BoxedHandler,
}

impl<F> Handler for GasFn<F>
where
    F: for<'a> Fn(&'a BoxedHandler, &'a mut Request, &'a mut Response) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        (self.f)(&self.next, req, res)
    }
}

/// Build a middleware from a closure that receives the next handler.
///
/// Not calling `next` short-circuits everything inside this stage.
pub fn gas_fn<F>(f: F) -> Gas
where
    F: for<'a> Fn(&'a BoxedHandler, &'a mut Request, &'a mut Response) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: BoxedHandler| -> BoxedHandler {
        Arc::new(GasFn {
            f: Arc::clone(&f),
            next,
        })
    })
}
