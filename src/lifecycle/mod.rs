//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     shutdown(timeout) → Draining → connections finish in-flight work → idle
//!                       → timeout elapsed → Closed → remaining connections dropped
//!     close()           → Closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls shutdown(timeout)
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has an optional deadline: forced close after it

pub mod shutdown;
pub mod signals;

pub use shutdown::{ServerState, Shutdown};
