//! Automatic certificate management.
//!
//! # Responsibilities
//! - Define the contract the certificate provider and HTTP-01 responder use
//! - Cache issued bundles under `<cert_root>/<name>` ([`DirCacheManager`])
//! - Order missing certificates from an ACME directory ([`AcmeManager`])
//!
//! # Design Decisions
//! - The serving core only asks for a certificate by name and for challenge
//!   responses; orders and account keys stay behind the trait
//! - Certificate lookups never block on the CA

use std::sync::Arc;

use rustls::sign::CertifiedKey;

use crate::net::tls::TlsError;

pub mod cache;
pub mod client;

pub use cache::DirCacheManager;
pub use client::{AcmeError, AcmeManager};

/// URL path prefix of HTTP-01 challenge requests.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Contract of an automatic certificate manager.
pub trait CertificateManager: Send + Sync {
    /// Certificate for a lower-cased, port-free DNS name.
    fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, TlsError>;

    /// Key authorization for a pending HTTP-01 token.
    fn http01_response(&self, token: &str) -> Option<String>;

    /// Called once the listeners are bound, with every whitelisted DNS name.
    fn warm_up(&self, server_names: &[String]) {
        let _ = server_names;
    }
}
