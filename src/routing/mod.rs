//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request (method, path)
//!     → router.rs (route lookup, first match wins)
//!     → matcher.rs (segment patterns, parameter capture)
//!     → Return: matched handler, or the 404/405 handler
//!
//! Lifecycle end:
//!     parameter values → Router::recycle_param_values → router's own pool
//! ```
//!
//! # Design Decisions
//! - Routes compiled at registration, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::Pattern;
pub use router::{ParamValuesPool, RouteTable, Router};
