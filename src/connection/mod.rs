pub mod auth;
pub mod config;

use crate::backend::memory::MemoryBackend;
use crate::backend::local_auth::LocalAuthProvider;
use crate::backend::rest::RestDocumentStore;
use crate::backend::{AuthProvider, DocumentStore};
use crate::catalog::{Catalog, CatalogPaths, Jabon, Tienda};
use crate::core::{Identity, Result, StoreError};
use crate::live::LiveCollections;
use std::sync::Arc;
use tracing::info;

use auth::AuthBootstrap;
use config::{AppConfig, BackendKind};

/// Application handle
///
/// Holds the configuration, the document store and the auth bootstrap.
/// Nothing touches data until [`ready`](Self::ready) hands out a [`Session`].
pub struct AppContext {
    config: AppConfig,
    auth: AuthBootstrap,
    store: Arc<dyn DocumentStore>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn AuthProvider>,
    ) -> Self {
        let auth = AuthBootstrap::new(provider, config.auth_token.clone());
        Self { config, auth, store }
    }

    /// Wires the backend named by the configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let backend = &config.backend;
        match backend.backend {
            BackendKind::Memory => {
                let memory = MemoryBackend::new();
                let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());
                let provider: Arc<dyn AuthProvider> = Arc::new(memory);
                info!(app_id = %config.app_id, "using in-memory backend");
                Ok(Self::new(config, store, provider))
            }
            BackendKind::Rest => {
                let base_url = backend.base_url.clone().ok_or_else(|| {
                    StoreError::MalformedConfiguration("REST backend requires 'base_url'".into())
                })?;
                let http = reqwest::Client::builder()
                    .timeout(backend.timeout())
                    .build()
                    .map_err(|e| StoreError::MalformedConfiguration(e.to_string()))?;

                let mut rest = RestDocumentStore::with_client(http, &base_url)?
                    .poll_interval(backend.poll_interval());
                if let Some(token) = &config.auth_token {
                    rest = rest.bearer_token(token.as_str());
                }
                info!(app_id = %config.app_id, base_url = %base_url, "using REST backend");

                let store: Arc<dyn DocumentStore> = Arc::new(rest);
                let provider: Arc<dyn AuthProvider> = Arc::new(LocalAuthProvider::new());
                Ok(Self::new(config, store, provider))
            }
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthBootstrap {
        &self.auth
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Waits for the auth handshake and returns a session bound to its identity.
    pub async fn ready(&self) -> Result<Session> {
        let identity = self.auth.ensure_ready().await?;
        Ok(Session::new(
            LiveCollections::new(Arc::clone(&self.store), identity.clone()),
            CatalogPaths::new(&self.config.app_id, self.config.backend.scope, identity),
        ))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.auth.sign_out().await
    }
}

/// Data access for an authenticated identity.
#[derive(Clone)]
pub struct Session {
    live: LiveCollections,
    paths: CatalogPaths,
}

impl Session {
    pub fn new(live: LiveCollections, paths: CatalogPaths) -> Self {
        Self { live, paths }
    }

    pub fn identity(&self) -> &Identity {
        self.live.identity()
    }

    pub fn live(&self) -> &LiveCollections {
        &self.live
    }

    pub fn paths(&self) -> &CatalogPaths {
        &self.paths
    }

    pub fn tiendas(&self) -> Result<Catalog<Tienda>> {
        Ok(Catalog::new(self.live.clone(), self.paths.tiendas()?))
    }

    pub fn jabones(&self) -> Result<Catalog<Jabon>> {
        Ok(Catalog::new(self.live.clone(), self.paths.jabones()?))
    }
}
