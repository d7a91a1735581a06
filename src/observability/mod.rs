//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (connection_id, method, path, status)
//!     → logging.rs (filter, format, single locked writer)
//!
//! Consumers:
//!     → Log aggregation (stdout, stderr, file)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID flows through connection and request records

pub mod logging;

pub use logging::init_logging;
