//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a server run.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for one listener run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported at startup and in log records.
    pub app_name: String,

    /// Debug mode: pretty output, relaxed host policy, no HSTS, no ACME.
    pub debug_mode: bool,

    /// Upper bound on request header bytes.
    pub max_header_bytes: usize,

    /// Grace period used by the binary on SIGINT/SIGTERM. 0 waits forever.
    pub shutdown_timeout_secs: u64,

    /// Listener configuration (address, ports, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Static certificate files.
    pub tls: TlsConfig,

    /// Automatic certificate settings.
    pub acme: AcmeConfig,

    /// Host filtering and HTTPS enforcement.
    pub security: SecurityConfig,

    /// Protocol upgrade settings.
    pub websocket: WebSocketConfig,

    /// Response content settings.
    pub content: ContentConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "gale".to_string(),
            debug_mode: false,
            max_header_bytes: 1 << 20,
            shutdown_timeout_secs: 30,
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            tls: TlsConfig::default(),
            acme: AcmeConfig::default(),
            security: SecurityConfig::default(),
            websocket: WebSocketConfig::default(),
            content: ContentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Whether a static certificate pair is configured.
    pub fn has_static_certificate(&self) -> bool {
        !self.tls.cert_file.is_empty() && !self.tls.key_file.is_empty()
    }

    /// Whether automatic certificates are in effect for this run.
    pub fn acme_active(&self) -> bool {
        !self.has_static_certificate() && self.acme.enabled && !self.debug_mode
    }

    /// Whether this run serves TLS at all.
    pub fn tls_active(&self) -> bool {
        self.has_static_certificate() || self.acme_active()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Port the automatic-certificate listener binds.
    pub https_port: u16,

    /// Port of the secondary plaintext listener.
    pub plain_http_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            https_port: 443,
            plain_http_port: 80,
        }
    }
}

/// Timeout configuration. A value of 0 disables the timeout.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum time to read a request: the head, then the body.
    pub read_secs: u64,

    /// Maximum time to receive a request head (or finish a TLS handshake).
    pub read_header_secs: u64,

    /// Maximum time a socket write may stay pending.
    pub write_secs: u64,

    /// How long a keep-alive connection may wait for its next request.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn read(&self) -> Option<Duration> {
        non_zero(self.read_secs)
    }

    /// Head timeout, falling back to the read timeout when unset.
    pub fn read_header(&self) -> Option<Duration> {
        non_zero(self.read_header_secs).or_else(|| self.read())
    }

    pub fn write(&self) -> Option<Duration> {
        non_zero(self.write_secs)
    }

    /// Idle timeout, falling back to the read timeout when unset.
    pub fn idle(&self) -> Option<Duration> {
        non_zero(self.idle_secs).or_else(|| self.read())
    }
}

fn non_zero(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Static TLS certificate files (PEM).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

/// Automatic certificate management settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeConfig {
    pub enabled: bool,

    /// ACME directory endpoint.
    pub directory_url: String,

    /// Directory holding cached certificate bundles.
    pub cert_root: String,

    /// Contact address registered with the CA.
    pub maintainer_email: String,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory_url: "https://acme-v02.api.letsencrypt.org/directory".to_string(),
            cert_root: "acme-certs".to_string(),
            maintainer_email: String::new(),
        }
    }
}

/// Host filtering and HTTPS enforcement.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allowed host names, compared case-insensitively. Empty allows all.
    pub host_whitelist: Vec<String>,

    /// Redirect plaintext traffic and send HSTS.
    pub https_enforced: bool,
}

/// Protocol upgrade settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Upper bound on the upgrade handoff. 0 waits forever.
    pub handshake_timeout_secs: u64,

    /// Subprotocols offered to clients, in preference order.
    pub subprotocols: Vec<String>,
}

impl WebSocketConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        non_zero(self.handshake_timeout_secs)
    }
}

/// Response content settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Push resources referenced by HTML responses over HTTP/2.
    pub auto_push_enabled: bool,

    /// Route blobs through the minifier.
    pub minifier_enabled: bool,

    /// Gzip blobs when the client accepts it.
    pub gzip_enabled: bool,

    /// Smallest blob worth compressing.
    pub gzip_min_length: usize,

    /// Document served for directory requests.
    pub index_file: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            auto_push_enabled: false,
            minifier_enabled: true,
            gzip_enabled: false,
            gzip_min_length: 1024,
            index_file: "index.html".to_string(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Env-filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// "stdout", "stderr", or a file path.
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.address, "0.0.0.0:8080");
        assert_eq!(config.listener.https_port, 443);
        assert!(config.content.minifier_enabled);
        assert!(!config.tls_active());
    }

    #[test]
    fn nested_sections_parse() {
        let config: ServerConfig = toml::from_str(
            r#"
            debug_mode = true

            [listener]
            address = "127.0.0.1:9000"

            [security]
            host_whitelist = ["example.com"]
            https_enforced = true

            [timeouts]
            read_secs = 5
            "#,
        )
        .unwrap();

        assert!(config.debug_mode);
        assert_eq!(config.listener.address, "127.0.0.1:9000");
        assert_eq!(config.security.host_whitelist, vec!["example.com"]);
        assert_eq!(config.timeouts.read(), Some(Duration::from_secs(5)));
        assert_eq!(config.timeouts.idle(), Some(Duration::from_secs(5)));
        assert_eq!(config.timeouts.read_header(), Some(Duration::from_secs(5)));
        assert_eq!(config.timeouts.write(), None);
    }

    #[test]
    fn acme_is_inactive_in_debug_mode_or_with_static_certificate() {
        let mut config = ServerConfig::default();
        config.acme.enabled = true;
        assert!(config.acme_active());

        config.debug_mode = true;
        assert!(!config.acme_active());

        config.debug_mode = false;
        config.tls.cert_file = "cert.pem".into();
        config.tls.key_file = "key.pem".into();
        assert!(!config.acme_active());
        assert!(config.tls_active());
    }
}
