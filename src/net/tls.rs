//! TLS configuration, certificate loading, and the handshake gate.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys into rustls `CertifiedKey`s
//! - Build the rustls server configuration (ALPN h2, http/1.1)
//! - Run the certificate decision on the ClientHello before any bytes are sent
//!
//! # Design Decisions
//! - `LazyConfigAcceptor` reads the ClientHello without answering it, so a
//!   rejected host sees the TCP connection close with no alert and no data
//! - Static certificates reuse one prebuilt configuration; managed ones build
//!   a configuration per accepted handshake around the selected key

use std::fmt;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::net::certificate::{CertificateDecision, CertificateProvider, CertificateSource, HandshakeInfo};

/// Errors raised while loading certificates or selecting one for a handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("unsupported private key in {path}: {source}")]
    InvalidKey {
        path: String,
        #[source]
        source: rustls::Error,
    },

    #[error("tls configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("unchallengeable host: {0}")]
    UnchallengeableHost(String),

    #[error("client did not send a server name")]
    MissingServerName,

    #[error("no certificate available for {0}")]
    CertificateUnavailable(String),

    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),
}

/// Load a certificate chain and key from two PEM files.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>, TlsError> {
    let cert_pem = read_file(cert_path)?;
    let key_pem = read_file(key_path)?;

    let certs = parse_certificates(&cert_pem, cert_path)?;
    let key = parse_private_key(&key_pem, key_path)?;
    certified_key(certs, key, key_path)
}

/// Load a certificate chain and key from a single PEM bundle.
pub fn load_certified_bundle(path: &Path) -> Result<Arc<CertifiedKey>, TlsError> {
    let pem = read_file(path)?;
    let certs = parse_certificates(&pem, path)?;
    let key = parse_private_key(&pem, path)?;
    certified_key(certs, key, path)
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn parse_certificates(pem: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.display().to_string()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8], path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

fn certified_key(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    key_path: &Path,
) -> Result<Arc<CertifiedKey>, TlsError> {
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|source| {
        TlsError::InvalidKey {
            path: key_path.display().to_string(),
            source,
        }
    })?;
    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

/// Resolver that always answers with the key chosen before the handshake.
struct SelectedCertificate(Arc<CertifiedKey>);

impl fmt::Debug for SelectedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedCertificate").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SelectedCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Build a server configuration that presents `key` and negotiates h2 or http/1.1.
pub fn server_config(key: Arc<CertifiedKey>) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SelectedCertificate(key)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Outcome of running the gate on one connection.
pub enum Handshake<S> {
    Established(TlsStream<S>),
    /// Host policy refused the name; the connection has been dropped.
    Rejected(Option<String>),
}

/// Applies the certificate decision to incoming TLS connections.
pub struct TlsGate {
    provider: Arc<CertificateProvider>,
    fixed: Option<Arc<ServerConfig>>,
}

impl TlsGate {
    pub fn new(provider: Arc<CertificateProvider>) -> Result<Self, TlsError> {
        let fixed = match provider.source() {
            CertificateSource::Static(key) => Some(server_config(Arc::clone(key))?),
            CertificateSource::Managed(_) => None,
        };
        Ok(Self { provider, fixed })
    }

    /// Read the ClientHello, decide, then either finish the handshake or drop `io`.
    pub async fn accept<S>(&self, io: S) -> Result<Handshake<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), io)
            .await
            .map_err(TlsError::Handshake)?;

        let hello = HandshakeInfo {
            server_name: start.client_hello().server_name().map(str::to_owned),
        };

        let key = match self.provider.select(&hello)? {
            CertificateDecision::Accept(key) => key,
            CertificateDecision::Reject => {
                drop(start);
                return Ok(Handshake::Rejected(hello.server_name));
            }
        };

        let config = match &self.fixed {
            Some(config) => Arc::clone(config),
            None => server_config(key)?,
        };

        let stream = start.into_stream(config).await.map_err(TlsError::Handshake)?;
        Ok(Handshake::Established(stream))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use rustls::pki_types::CertificateDer;
    use rustls::sign::{CertifiedKey, Signer, SigningKey};
    use rustls::{SignatureAlgorithm, SignatureScheme};

    /// Signing key that never signs; enough to exercise selection logic.
    #[derive(Debug)]
    pub struct InertKey;

    impl SigningKey for InertKey {
        fn choose_scheme(&self, _offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
            None
        }

        fn algorithm(&self) -> SignatureAlgorithm {
            SignatureAlgorithm::ECDSA
        }
    }

    pub fn inert_certified_key() -> Arc<CertifiedKey> {
        Arc::new(CertifiedKey::new(
            vec![CertificateDer::from(vec![0x30, 0x00])],
            Arc::new(InertKey),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::HostPolicy;
    use std::io::Write;

    #[test]
    fn missing_files_report_path() {
        let err = load_certified_key(Path::new("/nope/cert.pem"), Path::new("/nope/key.pem")).unwrap_err();
        assert!(err.to_string().contains("/nope/cert.pem"));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem file").unwrap();

        let err = load_certified_bundle(file.path()).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificate(_)));
    }

    fn client_hello(name: &str) -> Vec<u8> {
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let server_name = rustls::pki_types::ServerName::try_from(name.to_string()).unwrap();
        let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name).unwrap();
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out).unwrap();
        }
        out
    }

    #[tokio::test]
    async fn unlisted_server_name_is_dropped_without_reply() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let provider = CertificateProvider::new(
            CertificateSource::Static(test_support::inert_certified_key()),
            HostPolicy::new(&["example.com"], false),
        );
        let gate = TlsGate::new(Arc::new(provider)).unwrap();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(&client_hello("evil.example")).await.unwrap();

        let outcome = gate.accept(server).await.unwrap();
        assert!(matches!(outcome, Handshake::Rejected(Some(ref name)) if name == "evil.example"));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn alpn_prefers_h2() {
        let config = server_config(test_support::inert_certified_key()).unwrap();
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
        assert_eq!(config.alpn_protocols[1], b"http/1.1".to_vec());
    }
}
