//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (listener topology, hyper auto h1/h2/h2c, host gate)
//!     → dispatcher.rs (pooled Request/Response, lifecycle task)
//!     → pipeline.rs (pregases → router → gases → finalize → handler)
//!     → response/ (commit once, stream body, encoders, files, push, upgrade)
//!     → body.rs (channel-fed hyper body)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Handlers borrow the pooled request pair; nothing outlives the lifecycle
//! - A single immutable `ServerContext` replaces framework-wide globals
//! - Errors flow outward through the chain to one `ErrorHandler`

pub mod body;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod pool;
pub mod redirect;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use body::ResponseBody;
pub use context::{ServerContext, ServerContextBuilder};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error};
pub use handler::{gas_fn, handler_fn, BoxedHandler, Gas, Handler, HandlerFuture};
pub use pipeline::{DefaultErrorHandler, ErrorHandler, Pipeline};
pub use pool::Pool;
pub use request::{Request, RequestBody, RequestParam};
pub use response::{http_date, Response, SERVER_NAME};
pub use server::{Server, ServerError};
pub use websocket::{Incoming, WebSocket};
