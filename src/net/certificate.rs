//! Per-handshake certificate selection.
//!
//! # Responsibilities
//! - Apply the host whitelist to the SNI name of every TLS handshake
//! - Hand out the static certificate, or delegate to a certificate manager
//! - Keep IP literals and mixed-case names away from the manager
//!
//! # Design Decisions
//! - Selection is a synchronous function of the handshake descriptor; it does
//!   cache and config lookups only
//! - Rejection is a value, not an error: the caller closes the connection
//!   without telling the client why

use std::fmt;
use std::sync::Arc;

use rustls::sign::CertifiedKey;

use crate::net::acme::CertificateManager;
use crate::net::tls::TlsError;
use crate::security::{is_ip_literal, strip_port, HostPolicy};

/// What the client announced before certificate selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub server_name: Option<String>,
}

impl HandshakeInfo {
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            server_name: Some(name.into()),
        }
    }
}

/// Outcome of certificate selection for one handshake.
#[derive(Clone)]
pub enum CertificateDecision {
    Accept(Arc<CertifiedKey>),
    Reject,
}

impl CertificateDecision {
    pub fn is_reject(&self) -> bool {
        matches!(self, CertificateDecision::Reject)
    }
}

impl fmt::Debug for CertificateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateDecision::Accept(_) => f.write_str("Accept"),
            CertificateDecision::Reject => f.write_str("Reject"),
        }
    }
}

/// Where certificates come from. Exactly one source per run.
#[derive(Clone)]
pub enum CertificateSource {
    /// Loaded once at startup from configured files.
    Static(Arc<CertifiedKey>),
    /// Obtained per name from an automatic certificate manager.
    Managed(Arc<dyn CertificateManager>),
}

/// Resolves a certificate per handshake, enforcing host policy.
pub struct CertificateProvider {
    source: CertificateSource,
    policy: HostPolicy,
}

impl CertificateProvider {
    pub fn new(source: CertificateSource, policy: HostPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &CertificateSource {
        &self.source
    }

    /// Decide how to answer a handshake.
    pub fn select(&self, hello: &HandshakeInfo) -> Result<CertificateDecision, TlsError> {
        let requested = hello.server_name.as_deref().unwrap_or("");

        if !self.policy.allows(requested) {
            tracing::debug!(server_name = %requested, "Handshake refused by host policy");
            return Ok(CertificateDecision::Reject);
        }

        match &self.source {
            CertificateSource::Static(key) => Ok(CertificateDecision::Accept(Arc::clone(key))),
            CertificateSource::Managed(manager) => {
                let name = strip_port(requested);
                if name.is_empty() {
                    return Err(TlsError::MissingServerName);
                }
                if is_ip_literal(name) {
                    return Err(TlsError::UnchallengeableHost(name.to_string()));
                }
                manager
                    .certificate(&name.to_ascii_lowercase())
                    .map(CertificateDecision::Accept)
            }
        }
    }
}

impl fmt::Debug for CertificateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            CertificateSource::Static(_) => "static",
            CertificateSource::Managed(_) => "managed",
        };
        f.debug_struct("CertificateProvider")
            .field("source", &source)
            .field("policy", &self.policy)
            .finish()
    }
}
