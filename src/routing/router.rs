//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Define the `Router` collaborator used by the pipeline
//! - Store compiled routes and look up the handler for a request
//! - Own the pool backing route-parameter values
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - First match wins, in registration order
//! - Always returns a handler: misses resolve to a 404 or 405 handler
//! - Parameter value storage is recycled here, not in the request pool

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use http::{Method, StatusCode};

use crate::http::{handler_fn, BoxedHandler, Error, Request};
use crate::routing::matcher::Pattern;

/// Resolves the handler for a request.
pub trait Router: Send + Sync {
    /// Pick a handler, recording route parameters on `req`.
    fn route(&self, req: &mut Request) -> BoxedHandler;

    /// Take back parameter value storage once a request lifecycle ends.
    fn recycle_param_values(&self, values: Vec<String>) {
        drop(values);
    }
}

/// Vectors kept by [`ParamValuesPool::new`].
const DEFAULT_PARAM_VECTORS: usize = 1024;

/// Bounded free-list of parameter value vectors.
///
/// Vectors returned while the list is full are dropped.
#[derive(Debug)]
pub struct ParamValuesPool {
    free: ArrayQueue<Vec<String>>,
}

impl ParamValuesPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PARAM_VECTORS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// An empty vector, reusing a returned allocation when one is available.
    pub fn take(&self) -> Vec<String> {
        self.free.pop().unwrap_or_default()
    }

    pub fn put(&self, mut values: Vec<String>) {
        values.clear();
        let _ = self.free.push(values);
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl Default for ParamValuesPool {
    fn default() -> Self {
        Self::new()
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: BoxedHandler,
}

/// Method plus path-pattern routing table.
pub struct RouteTable {
    routes: Vec<Route>,
    not_found: BoxedHandler,
    method_not_allowed: BoxedHandler,
    values: ParamValuesPool,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            not_found: status_handler(StatusCode::NOT_FOUND),
            method_not_allowed: status_handler(StatusCode::METHOD_NOT_ALLOWED),
            values: ParamValuesPool::new(),
        }
    }

    /// Register `handler` for `method` requests matching `pattern`.
    pub fn add(mut self, method: Method, pattern: &str, handler: BoxedHandler) -> Self {
        tracing::debug!(method = %method, pattern = pattern, "Route registered");
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        });
        self
    }

    pub fn get(self, pattern: &str, handler: BoxedHandler) -> Self {
        self.add(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: BoxedHandler) -> Self {
        self.add(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: BoxedHandler) -> Self {
        self.add(Method::PUT, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: BoxedHandler) -> Self {
        self.add(Method::DELETE, pattern, handler)
    }

    /// Handler for paths no route matches.
    pub fn not_found(mut self, handler: BoxedHandler) -> Self {
        self.not_found = handler;
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Parameter vectors waiting for reuse.
    pub fn idle_param_values(&self) -> usize {
        self.values.idle()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Router for RouteTable {
    fn route(&self, req: &mut Request) -> BoxedHandler {
        let mut values = self.values.take();
        let mut path_matched = false;
        let mut found = None;

        {
            let method = req.method();
            let path = req.path();
            for route in &self.routes {
                values.clear();
                if !route.pattern.matches(path, &mut values) {
                    continue;
                }
                path_matched = true;
                if route.method == method || (*method == Method::HEAD && route.method == Method::GET) {
                    found = Some(route);
                    break;
                }
            }
        }

        match found {
            Some(route) => {
                req.set_route_params(Arc::clone(route.pattern.names()), values);
                Arc::clone(&route.handler)
            }
            None => {
                self.values.put(values);
                if path_matched {
                    Arc::clone(&self.method_not_allowed)
                } else {
                    Arc::clone(&self.not_found)
                }
            }
        }
    }

    fn recycle_param_values(&self, values: Vec<String>) {
        self.values.put(values);
    }
}

fn status_handler(status: StatusCode) -> BoxedHandler {
    handler_fn(move |_req, _res| {
        Box::pin(async move {
            Err(Error::status_with(
                status,
                status.canonical_reason().unwrap_or("Error"),
            ))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_pool_reuses_allocations() {
        let pool = ParamValuesPool::new();
        let mut values = pool.take();
        values.reserve(8);
        values.push("x".to_string());
        let capacity = values.capacity();
        pool.put(values);

        let again = pool.take();
        assert!(again.is_empty());
        assert_eq!(again.capacity(), capacity);
    }

    #[test]
    fn param_pool_is_bounded() {
        let pool = ParamValuesPool::with_capacity(2);
        for _ in 0..5 {
            pool.put(Vec::with_capacity(4));
        }
        assert_eq!(pool.idle(), 2);

        pool.take();
        pool.take();
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.take().capacity(), 0);
    }
}
