//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! TLS ClientHello (SNI)          Plaintext request (Host header)
//!     → net::certificate             → http::server host gate
//!              ╲                    ╱
//!               host_policy.rs (whitelist)
//!                    → allowed: continue
//!                    → denied:  close the connection, say nothing
//! ```
//!
//! # Design Decisions
//! - Fail closed: disallowed hosts never reach application code
//! - No trust in client input: ports and case are normalised before lookup

pub mod host_policy;

pub use host_policy::{is_ip_literal, strip_port, HostPolicy};
