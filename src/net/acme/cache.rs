use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rustls::sign::CertifiedKey;

use crate::net::acme::CertificateManager;
use crate::net::tls::{load_certified_bundle, TlsError};

/// Manager backed by a certificate cache directory.
///
/// Bundles hold the private key and the certificate chain in one PEM file
/// named after the host. On its own it serves whatever the directory holds;
/// [`AcmeManager`](super::AcmeManager) fills it.
pub struct DirCacheManager {
    cache_root: PathBuf,
    certificates: DashMap<String, Arc<CertifiedKey>>,
    challenges: DashMap<String, String>,
}

impl DirCacheManager {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            certificates: DashMap::new(),
            challenges: DashMap::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Publish the key authorization for a pending challenge.
    pub fn register_challenge(&self, token: impl Into<String>, key_authorization: impl Into<String>) {
        self.challenges.insert(token.into(), key_authorization.into());
    }

    pub fn remove_challenge(&self, token: &str) {
        self.challenges.remove(token);
    }

    /// Forget a memoised certificate so the next handshake rereads the cache.
    pub fn evict(&self, server_name: &str) {
        self.certificates.remove(server_name);
    }

    /// Pending challenges, for diagnostics.
    pub fn pending_challenges(&self) -> HashMap<String, String> {
        self.challenges
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Write a key-and-chain bundle for `server_name` and start serving it.
    pub async fn store(&self, server_name: &str, bundle_pem: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        let path = self.bundle_path(server_name);
        let io_error = |source| TlsError::Io {
            path: path.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.cache_root).await.map_err(io_error)?;
        tokio::fs::write(&path, bundle_pem).await.map_err(io_error)?;

        let key = load_certified_bundle(&path)?;
        self.certificates
            .insert(server_name.to_string(), Arc::clone(&key));
        tracing::info!(server_name = %server_name, path = %path.display(), "Stored certificate");
        Ok(key)
    }

    fn bundle_path(&self, server_name: &str) -> PathBuf {
        self.cache_root.join(server_name)
    }
}

impl CertificateManager for DirCacheManager {
    fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        if let Some(key) = self.certificates.get(server_name) {
            return Ok(Arc::clone(key.value()));
        }

        let path = self.bundle_path(server_name);
        if !path.is_file() {
            tracing::debug!(
                server_name = %server_name,
                cache_root = %self.cache_root.display(),
                "No cached certificate"
            );
            return Err(TlsError::CertificateUnavailable(server_name.to_string()));
        }

        let key = load_certified_bundle(&path)?;
        tracing::info!(server_name = %server_name, "Loaded cached certificate");
        self.certificates
            .insert(server_name.to_string(), Arc::clone(&key));
        Ok(key)
    }

    fn http01_response(&self, token: &str) -> Option<String> {
        self.challenges.get(token).map(|v| v.value().clone())
    }
}

impl fmt::Debug for DirCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirCacheManager")
            .field("cache_root", &self.cache_root)
            .field("cached", &self.certificates.len())
            .field("challenges", &self.challenges.len())
            .finish()
    }
}
