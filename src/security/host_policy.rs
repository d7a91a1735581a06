//! Host whitelist enforcement.
//!
//! # Responsibilities
//! - Decide whether a requested host (SNI name or Host header) is served
//! - Strip port suffixes, including bracketed IPv6 forms
//! - Classify IP-literal hosts (no redirect, no ACME)
//!
//! # Design Decisions
//! - Comparison is case-insensitive; names are lowered once at construction
//! - Empty whitelist or debug mode allows every host
//! - Rejections are never explained to the client; callers close the connection

use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::ServerConfig;

/// Immutable host whitelist shared by every listener of a run.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    allowed: HashSet<String>,
    allow_all: bool,
}

impl HostPolicy {
    /// Build the policy for a server run.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.security.host_whitelist, config.debug_mode)
    }

    pub fn new<S: AsRef<str>>(whitelist: &[S], debug_mode: bool) -> Self {
        let allowed: HashSet<String> = whitelist
            .iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        Self {
            allow_all: debug_mode || allowed.is_empty(),
            allowed,
        }
    }

    /// Whether the host, with or without a port suffix, may be served.
    pub fn allows(&self, host: &str) -> bool {
        if self.allow_all {
            return true;
        }
        self.allowed.contains(&strip_port(host).to_ascii_lowercase())
    }

    /// Whether any host may be served.
    pub fn allows_all(&self) -> bool {
        self.allow_all
    }
}

/// Remove a `:port` suffix. Bracketed IPv6 literals lose their brackets.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => host,
        };
    }

    match host.rfind(':') {
        // A second colon means an unbracketed IPv6 literal, not a port.
        Some(idx) if !host[..idx].contains(':') => &host[..idx],
        _ => host,
    }
}

/// Whether the host (port already stripped or not) is an IP literal.
pub fn is_ip_literal(host: &str) -> bool {
    strip_port(host).parse::<IpAddr>().is_ok()
}
