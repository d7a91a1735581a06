//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connection limits, header sizes, ports)
//! - Detect contradictory settings (half-configured certificate pair)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::schema::ServerConfig;

/// Smallest header budget that still admits ordinary browser requests.
const MIN_HEADER_BYTES: usize = 4096;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.address",
            format!("'{}' is not a socket address", config.listener.address),
        ));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }

    if config.listener.https_port == 0 {
        errors.push(ValidationError::new("listener.https_port", "must be non-zero"));
    }

    if config.listener.plain_http_port == 0 {
        errors.push(ValidationError::new("listener.plain_http_port", "must be non-zero"));
    }

    if config.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::new(
            "max_header_bytes",
            format!("must be at least {}", MIN_HEADER_BYTES),
        ));
    }

    if config.tls.cert_file.is_empty() != config.tls.key_file.is_empty() {
        errors.push(ValidationError::new(
            "tls",
            "cert_file and key_file must be set together",
        ));
    }

    if config.acme.enabled {
        if config.acme.directory_url.is_empty() {
            errors.push(ValidationError::new("acme.directory_url", "must not be empty"));
        }
        if config.acme.cert_root.is_empty() {
            errors.push(ValidationError::new("acme.cert_root", "must not be empty"));
        }
    }

    if EnvFilter::try_new(&config.logging.level).is_err() {
        errors.push(ValidationError::new(
            "logging.level",
            format!("'{}' is not a valid filter directive", config.logging.level),
        ));
    }

    if config.content.index_file.is_empty() || config.content.index_file.contains('/') {
        errors.push(ValidationError::new(
            "content.index_file",
            "must be a bare file name",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
