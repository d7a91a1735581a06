//! ACME issuance for names missing from the certificate cache.
//!
//! # Data Flow
//! ```text
//! handshake for an uncached name
//!     → certificate(): cache miss → order in the background, fail this handshake
//!     → account: <cert_root>/acme_account+key.json, registered on first use
//!     → new order → HTTP-01 key authorizations published to the cache
//!     → challenges marked ready → order polled until Ready
//!     → CSR with a fresh key → finalize → certificate chain polled
//!     → key + chain written to <cert_root>/<name> and served from memory
//! ```
//!
//! # Design Decisions
//! - One order per name at a time; a name is released when its order ends,
//!   successful or not, so the next handshake can retry
//! - Challenge tokens are withdrawn once the order ends

use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::AcmeConfig;
use crate::net::acme::{CertificateManager, DirCacheManager};
use crate::net::tls::TlsError;

const ACCOUNT_FILE: &str = "acme_account+key.json";
const FIRST_POLL: Duration = Duration::from_millis(250);
const MAX_POLL: Duration = Duration::from_secs(8);
const POLL_ATTEMPTS: u32 = 15;

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("acme: {0}")]
    Protocol(#[from] instant_acme::Error),

    #[error("certificate request: {0}")]
    Csr(#[from] rcgen::Error),

    #[error("account credentials: {0}")]
    Credentials(#[from] serde_json::Error),

    #[error("account storage: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("{0}: no http-01 challenge offered")]
    NoHttp01Challenge(String),

    #[error("{name}: authorization is {status}")]
    Authorization { name: String, status: String },

    #[error("{0}: order is invalid")]
    OrderInvalid(String),

    #[error("{0}: gave up waiting for the certificate authority")]
    TimedOut(String),
}

/// Certificate manager that orders missing certificates over ACME.
#[derive(Clone)]
pub struct AcmeManager {
    shared: Arc<Shared>,
}

struct Shared {
    cache: DirCacheManager,
    directory_url: String,
    contact: Option<String>,
    account: OnceCell<Account>,
    ordering: DashSet<String>,
}

impl AcmeManager {
    pub fn new(config: &AcmeConfig) -> Self {
        let email = config.maintainer_email.trim();
        Self {
            shared: Arc::new(Shared {
                cache: DirCacheManager::new(&config.cert_root),
                directory_url: config.directory_url.clone(),
                contact: (!email.is_empty()).then(|| format!("mailto:{email}")),
                account: OnceCell::new(),
                ordering: DashSet::new(),
            }),
        }
    }

    pub fn cache(&self) -> &DirCacheManager {
        &self.shared.cache
    }

    pub fn directory_url(&self) -> &str {
        &self.shared.directory_url
    }

    /// Whether an order for `server_name` is in progress.
    pub fn is_ordering(&self, server_name: &str) -> bool {
        self.shared.ordering.contains(server_name)
    }

    /// Certificate for `server_name`, ordering one now if none is cached.
    pub async fn obtain(&self, server_name: &str) -> Result<Arc<CertifiedKey>, AcmeError> {
        match self.shared.cache.certificate(server_name) {
            Ok(key) => Ok(key),
            Err(TlsError::CertificateUnavailable(_)) => self.shared.issue(server_name).await,
            Err(err) => Err(err.into()),
        }
    }

    fn order_in_background(&self, server_name: &str) {
        if !self.shared.ordering.insert(server_name.to_string()) {
            return;
        }
        let claim = Claim {
            shared: Arc::clone(&self.shared),
            name: server_name.to_string(),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(server_name = %server_name, "No runtime to order a certificate on");
            return;
        };
        runtime.spawn(async move {
            tracing::info!(server_name = %claim.name, directory = %claim.shared.directory_url, "Ordering certificate");
            match claim.shared.issue(&claim.name).await {
                Ok(_) => tracing::info!(server_name = %claim.name, "Certificate issued"),
                Err(err) => tracing::warn!(server_name = %claim.name, error = %err, "Certificate order failed"),
            }
        });
    }
}

impl CertificateManager for AcmeManager {
    fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, TlsError> {
        let result = self.shared.cache.certificate(server_name);
        if let Err(TlsError::CertificateUnavailable(_)) = result {
            self.order_in_background(server_name);
        }
        result
    }

    fn http01_response(&self, token: &str) -> Option<String> {
        self.shared.cache.http01_response(token)
    }

    fn warm_up(&self, server_names: &[String]) {
        for name in server_names {
            let _ = self.certificate(name);
        }
    }
}

impl std::fmt::Debug for AcmeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeManager")
            .field("directory_url", &self.shared.directory_url)
            .field("cache", &self.shared.cache)
            .field("ordering", &self.shared.ordering.len())
            .finish()
    }
}

/// Releases a name from the ordering set when dropped.
struct Claim {
    shared: Arc<Shared>,
    name: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.shared.ordering.remove(&self.name);
    }
}

impl Shared {
    async fn account(&self) -> Result<&Account, AcmeError> {
        self.account.get_or_try_init(|| self.load_or_register()).await
    }

    async fn load_or_register(&self) -> Result<Account, AcmeError> {
        let path = self.cache.cache_root().join(ACCOUNT_FILE);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let credentials: AccountCredentials = serde_json::from_slice(&raw)?;
                return Ok(Account::from_credentials(credentials).await?);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let contact: Vec<&str> = self.contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        tokio::fs::create_dir_all(self.cache.cache_root()).await?;
        tokio::fs::write(&path, serde_json::to_vec(&credentials)?).await?;
        tracing::info!(directory = %self.directory_url, "Registered ACME account");
        Ok(account)
    }

    async fn issue(&self, name: &str) -> Result<Arc<CertifiedKey>, AcmeError> {
        let account = self.account().await?;
        let identifiers = [Identifier::Dns(name.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        let mut tokens = Vec::new();
        let result = self.complete(&mut order, name, &mut tokens).await;
        for token in &tokens {
            self.cache.remove_challenge(token);
        }
        result
    }

    async fn complete(
        &self,
        order: &mut Order,
        name: &str,
        tokens: &mut Vec<String>,
    ) -> Result<Arc<CertifiedKey>, AcmeError> {
        for authorization in order.authorizations().await? {
            match authorization.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                ref status => {
                    return Err(AcmeError::Authorization {
                        name: name.to_string(),
                        status: format!("{status:?}"),
                    })
                }
            }

            let challenge = authorization
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| AcmeError::NoHttp01Challenge(name.to_string()))?;

            let key_authorization = order.key_authorization(challenge);
            self.cache
                .register_challenge(challenge.token.clone(), key_authorization.as_str());
            tokens.push(challenge.token.clone());
            order.set_challenge_ready(&challenge.url).await?;
        }

        let mut delay = FIRST_POLL;
        let mut attempts = 0;
        loop {
            tokio::time::sleep(delay).await;
            match order.refresh().await?.status {
                OrderStatus::Ready => break,
                OrderStatus::Invalid => return Err(AcmeError::OrderInvalid(name.to_string())),
                _ => {}
            }
            attempts += 1;
            if attempts >= POLL_ATTEMPTS {
                return Err(AcmeError::TimedOut(name.to_string()));
            }
            delay = (delay * 2).min(MAX_POLL);
        }

        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![name.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        let mut delay = FIRST_POLL;
        let mut chain = None;
        for _ in 0..POLL_ATTEMPTS {
            if let Some(pem) = order.certificate().await? {
                chain = Some(pem);
                break;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_POLL);
        }
        let chain = chain.ok_or_else(|| AcmeError::TimedOut(name.to_string()))?;

        let bundle = format!("{}{}", key_pair.serialize_pem(), chain);
        Ok(self.cache.store(name, &bundle).await?)
    }
}
