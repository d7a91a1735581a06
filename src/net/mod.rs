//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional: ClientHello → certificate.rs decision → handshake or drop)
//!     → io.rs (write deadline)
//!     → connection.rs (lifecycle tracking, idle clock)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Certificate selection happens before any TLS byte is written
//! - acme/ owns certificate orders; the serving core only asks it for
//!   certificates and challenge responses

pub mod acme;
pub mod certificate;
pub mod connection;
pub mod io;
pub mod listener;
pub mod tls;

pub use certificate::{CertificateDecision, CertificateProvider, CertificateSource, HandshakeInfo};
pub use connection::{ConnectionInfo, ConnectionTracker};
pub use listener::Listener;
pub use tls::{TlsError, TlsGate};
