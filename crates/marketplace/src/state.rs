//! Marketplace services wired together.

use std::sync::Arc;

use thiserror::Error;

use crate::config::MarketplaceConfig;
use crate::identity::{
    AuthError, IdentityToolkitClient, LocalOAuthProvider, OAuthIdentity, PasswordAuth,
};
use crate::listings::{Catalog, ListingService, OwnershipView};
use crate::profile::ProfileService;
use crate::session::SessionContext;
use crate::store::{DocumentStore, RealtimeDbClient, StoreError};

/// Error building the marketplace from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("document store: {0}")]
    Store(#[from] StoreError),
    #[error("password provider: {0}")]
    Auth(#[from] AuthError),
}

/// Every marketplace service, sharing one store and one session.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct Marketplace {
    inner: Arc<MarketplaceInner>,
}

struct MarketplaceInner {
    config: MarketplaceConfig,
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
    profiles: ProfileService,
    listings: ListingService,
    catalog: Catalog,
}

impl Marketplace {
    /// Connect to the hosted store and password provider.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn connect(config: MarketplaceConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn DocumentStore> = Arc::new(RealtimeDbClient::new(&config.store)?);
        let password: Arc<dyn PasswordAuth> =
            Arc::new(IdentityToolkitClient::new(&config.password_auth)?);
        let oauth: Arc<dyn OAuthIdentity> = Arc::new(LocalOAuthProvider::loaded());
        tracing::info!(
            live = config.oauth.is_live(),
            store = %config.store.base_url,
            "marketplace connected"
        );
        Ok(Self::with_backends(config, store, oauth, password))
    }

    /// Build the services over explicit backends.
    #[must_use]
    pub fn with_backends(
        config: MarketplaceConfig,
        store: Arc<dyn DocumentStore>,
        oauth: Arc<dyn OAuthIdentity>,
        password: Arc<dyn PasswordAuth>,
    ) -> Self {
        let timeout = config.operation_timeout;
        let profiles = ProfileService::new(Arc::clone(&store), timeout);
        let session = SessionContext::new(
            oauth,
            password,
            profiles.clone(),
            config.provider_wait,
            timeout,
        );
        let listings = ListingService::new(Arc::clone(&store), session.clone(), timeout);
        let catalog = Catalog::new(Arc::clone(&store), profiles.clone(), timeout);

        Self {
            inner: Arc::new(MarketplaceInner {
                config,
                store,
                session,
                profiles,
                listings,
                catalog,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MarketplaceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileService {
        &self.inner.profiles
    }

    #[must_use]
    pub fn listings(&self) -> &ListingService {
        &self.inner.listings
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// A fresh "my listings" view over the shared store.
    #[must_use]
    pub fn ownership_view(&self) -> OwnershipView {
        OwnershipView::new(
            Arc::clone(&self.inner.store),
            self.inner.config.operation_timeout,
        )
    }
}
