//! Immutable server context shared by every component of a run.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::content::{Coffer, DefaultMinifier, Localizer, Minifier, NoCoffer, NoLocalizer, NoRenderer, Renderer};
use crate::http::handler::Gas;
use crate::http::pipeline::{DefaultErrorHandler, ErrorHandler};
use crate::net::acme::{AcmeManager, CertificateManager};
use crate::routing::{RouteTable, Router};
use crate::security::HostPolicy;

/// Configuration plus collaborators, fixed for the lifetime of a run.
pub struct ServerContext {
    pub config: ServerConfig,
    pub host_policy: HostPolicy,
    pub router: Arc<dyn Router>,
    pub pregases: Vec<Gas>,
    pub gases: Vec<Gas>,
    pub error_handler: Arc<dyn ErrorHandler>,
    pub minifier: Arc<dyn Minifier>,
    pub coffer: Arc<dyn Coffer>,
    pub renderer: Arc<dyn Renderer>,
    pub localizer: Arc<dyn Localizer>,
    /// Present when automatic certificates are active.
    pub certificate_manager: Option<Arc<dyn CertificateManager>>,
}

impl ServerContext {
    pub fn builder(config: ServerConfig) -> ServerContextBuilder {
        ServerContextBuilder {
            config,
            router: None,
            pregases: Vec::new(),
            gases: Vec::new(),
            error_handler: None,
            minifier: None,
            coffer: None,
            renderer: None,
            localizer: None,
            certificate_manager: None,
        }
    }

    /// Context with default collaborators; every route is 404.
    pub fn with_defaults(config: ServerConfig) -> Arc<Self> {
        Self::builder(config).build()
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("app_name", &self.config.app_name)
            .field("pregases", &self.pregases.len())
            .field("gases", &self.gases.len())
            .field("acme", &self.certificate_manager.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerContext`].
pub struct ServerContextBuilder {
    config: ServerConfig,
    router: Option<Arc<dyn Router>>,
    pregases: Vec<Gas>,
    gases: Vec<Gas>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    minifier: Option<Arc<dyn Minifier>>,
    coffer: Option<Arc<dyn Coffer>>,
    renderer: Option<Arc<dyn Renderer>>,
    localizer: Option<Arc<dyn Localizer>>,
    certificate_manager: Option<Arc<dyn CertificateManager>>,
}

impl ServerContextBuilder {
    pub fn router(mut self, router: impl Router + 'static) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Append a middleware that runs before route resolution.
    pub fn pregas(mut self, gas: Gas) -> Self {
        self.pregases.push(gas);
        self
    }

    /// Append a middleware that wraps the matched handler.
    pub fn gas(mut self, gas: Gas) -> Self {
        self.gases.push(gas);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn minifier(mut self, minifier: impl Minifier + 'static) -> Self {
        self.minifier = Some(Arc::new(minifier));
        self
    }

    pub fn coffer(mut self, coffer: impl Coffer + 'static) -> Self {
        self.coffer = Some(Arc::new(coffer));
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn localizer(mut self, localizer: impl Localizer + 'static) -> Self {
        self.localizer = Some(Arc::new(localizer));
        self
    }

    /// Replace the ACME manager used for automatic TLS.
    pub fn certificate_manager(mut self, manager: Arc<dyn CertificateManager>) -> Self {
        self.certificate_manager = Some(manager);
        self
    }

    pub fn build(self) -> Arc<ServerContext> {
        let config = self.config;
        let certificate_manager = if config.acme_active() {
            self.certificate_manager
                .or_else(|| Some(Arc::new(AcmeManager::new(&config.acme)) as Arc<dyn CertificateManager>))
        } else {
            None
        };

        Arc::new(ServerContext {
            host_policy: HostPolicy::from_config(&config),
            router: self.router.unwrap_or_else(|| Arc::new(RouteTable::new())),
            pregases: self.pregases,
            gases: self.gases,
            error_handler: self.error_handler.unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
            minifier: self.minifier.unwrap_or_else(|| Arc::new(DefaultMinifier)),
            coffer: self.coffer.unwrap_or_else(|| Arc::new(NoCoffer)),
            renderer: self.renderer.unwrap_or_else(|| Arc::new(NoRenderer)),
            localizer: self.localizer.unwrap_or_else(|| Arc::new(NoLocalizer)),
            certificate_manager,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_manager_only_with_acme() {
        let ctx = ServerContext::with_defaults(ServerConfig::default());
        assert!(ctx.certificate_manager.is_none());

        let mut config = ServerConfig::default();
        config.acme.enabled = true;
        let ctx = ServerContext::with_defaults(config.clone());
        assert!(ctx.certificate_manager.is_some());

        config.debug_mode = true;
        let ctx = ServerContext::with_defaults(config);
        assert!(ctx.certificate_manager.is_none());
    }
}
