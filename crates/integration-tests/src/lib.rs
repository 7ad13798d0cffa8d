//! Integration tests for Bizay.
//!
//! Every scenario runs the full marketplace over in-process collaborators:
//! the in-memory document store, the in-memory password provider and the
//! local OAuth provider. No network access is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p bizay-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_resolution` - provider precedence and bounded waits
//! - `profile_materialization` - first-contact profiles, idempotency, edits
//! - `ownership` - live listing view and the mutation ownership check
//! - `catalog` - guest browsing
//! - `submission` - duplicate-submission guard

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use bizay_core::{Email, OAuthStrategy, PrincipalId};
use bizay_marketplace::config::ConfigError;
use bizay_marketplace::identity::{InMemoryPasswordAuth, LocalOAuthProvider, OAuthPrincipal};
use bizay_marketplace::listings::{Listing, ListingDraft, ListingsHandler, ViewErrorHandler};
use bizay_marketplace::profile::SignUpForm;
use bizay_marketplace::store::{
    ChangeHandler, CreateOutcome, DocumentStore, ErrorHandler, InMemoryStore, StoreError,
    StorePath, Subscription,
};
use bizay_marketplace::{Marketplace, MarketplaceConfig};

/// Configuration with test values for every required variable.
///
/// # Errors
///
/// Never fails for the built-in values; returns `ConfigError` only if
/// `overrides` contains an invalid value.
pub fn test_config(overrides: &[(&str, &str)]) -> Result<MarketplaceConfig, ConfigError> {
    let mut vars: HashMap<&str, &str> = HashMap::from([
        ("BIZAY_OAUTH_PUBLISHABLE_KEY", "pk_test_Yml6YXk"),
        ("BIZAY_DATABASE_URL", "https://bizay-test.firebaseio.com"),
        ("BIZAY_AUTH_API_KEY", "AIzaTest"),
        ("BIZAY_OPERATION_TIMEOUT_SECS", "5"),
        ("BIZAY_PROVIDER_WAIT_SECS", "5"),
    ]);
    vars.extend(overrides.iter().copied());
    MarketplaceConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_owned()))
}

/// A marketplace wired to in-process collaborators, with handles on each.
pub struct TestMarket {
    pub market: Marketplace,
    pub store: InMemoryStore,
    pub oauth: LocalOAuthProvider,
    pub password: InMemoryPasswordAuth,
}

impl TestMarket {
    /// Both providers loaded, nobody signed in, empty store.
    ///
    /// # Panics
    ///
    /// Panics if the built-in test configuration is rejected.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(
            InMemoryStore::new(),
            LocalOAuthProvider::loaded(),
            InMemoryPasswordAuth::new(),
        )
    }

    /// Build over explicit collaborators.
    ///
    /// # Panics
    ///
    /// Panics if the built-in test configuration is rejected.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_parts(
        store: InMemoryStore,
        oauth: LocalOAuthProvider,
        password: InMemoryPasswordAuth,
    ) -> Self {
        let config = test_config(&[]).expect("test configuration is valid");
        let market = Marketplace::with_backends(
            config,
            Arc::new(store.clone()),
            Arc::new(oauth.clone()),
            Arc::new(password.clone()),
        );
        Self {
            market,
            store,
            oauth,
            password,
        }
    }

    /// Register a password account without signing in.
    ///
    /// # Panics
    ///
    /// Panics on an invalid id or email.
    #[allow(clippy::expect_used)]
    pub fn register(&self, id: &str, email: &str, password: &str) {
        self.password.register(
            principal(id),
            Email::parse(email).expect("valid test email"),
            password,
        );
    }

    /// Script the account an OAuth flow for `strategy` returns.
    pub fn script_oauth(&self, id: &str, strategy: OAuthStrategy, first: &str, last: &str) {
        let mut account = OAuthPrincipal::new(principal(id), strategy);
        account.first_name = Some(first.to_owned()).filter(|s| !s.is_empty());
        account.last_name = Some(last.to_owned()).filter(|s| !s.is_empty());
        self.oauth.script(account);
    }
}

impl TestMarket {
    /// Like [`TestMarket::new`], with the store behind a [`HeldStore`].
    ///
    /// `store` still sees every write once it is released.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_held_writes() -> (Self, HeldStore) {
        let store = InMemoryStore::new();
        let held = HeldStore::new(store.clone());
        let oauth = LocalOAuthProvider::loaded();
        let password = InMemoryPasswordAuth::new();
        let config = test_config(&[]).expect("test configuration is valid");
        let market = Marketplace::with_backends(
            config,
            Arc::new(held.clone()),
            Arc::new(oauth.clone()),
            Arc::new(password.clone()),
        );
        let t = Self {
            market,
            store,
            oauth,
            password,
        };
        (t, held)
    }
}

impl Default for TestMarket {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a principal id.
///
/// # Panics
///
/// Panics on an invalid id.
#[must_use]
#[allow(clippy::expect_used)]
pub fn principal(id: &str) -> PrincipalId {
    PrincipalId::parse(id).expect("valid test principal")
}

/// A complete sign-up form.
#[must_use]
pub fn sign_up_form(first: &str, last: &str, email: &str) -> SignUpForm {
    SignUpForm {
        first_name: first.to_owned(),
        last_name: last.to_owned(),
        email: email.to_owned(),
        password: secret("secret1"),
        phone: "37001122".to_owned(),
        address: "Delmas 33".to_owned(),
    }
}

/// A complete publish form.
#[must_use]
pub fn draft(title: &str) -> ListingDraft {
    ListingDraft {
        title: title.to_owned(),
        description: "Bon état".to_owned(),
        price: "1500".to_owned(),
        image_url: "https://img.example/item.jpg".to_owned(),
        category: "Maison".to_owned(),
        location: "Port-au-Prince".to_owned(),
        contact: "37123456".to_owned(),
    }
}

#[must_use]
pub fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

/// Every listing set an ownership view delivered, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    updates: Arc<Mutex<Vec<Vec<Listing>>>>,
    errors: Arc<Mutex<usize>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_update(&self) -> ListingsHandler {
        let updates = Arc::clone(&self.updates);
        Arc::new(move |listings| {
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(listings);
        })
    }

    #[must_use]
    pub fn on_error(&self) -> ViewErrorHandler {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |_| {
            *errors.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        })
    }

    /// Titles of the most recent delivery.
    #[must_use]
    pub fn latest_titles(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|listings| listings.iter().map(|l| l.title.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn deliveries(&self) -> usize {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        *self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Held store
// =============================================================================

/// Store wrapper that can park the next mutation until released.
///
/// Reads and conditional creates pass straight through; `write`, `update`,
/// `remove` and `push` park when armed with [`HeldStore::hold_next_write`].
#[derive(Clone)]
pub struct HeldStore {
    inner: InMemoryStore,
    armed: Arc<AtomicBool>,
    parked: Arc<Notify>,
    release: Arc<Notify>,
}

impl HeldStore {
    #[must_use]
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            armed: Arc::new(AtomicBool::new(false)),
            parked: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Park the next mutation until [`HeldStore::release`].
    pub fn hold_next_write(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until a mutation is parked.
    pub async fn parked(&self) {
        self.parked.notified().await;
    }

    /// Let the parked mutation through.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn gate(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl DocumentStore for HeldStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.gate().await;
        self.inner.write(path, value).await
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.gate().await;
        self.inner.update(path, fields).await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.gate().await;
        self.inner.remove(path).await
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        self.gate().await;
        self.inner.push(path, value).await
    }

    async fn create_if_absent(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<CreateOutcome, StoreError> {
        self.inner.create_if_absent(path, value).await
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        on_change: ChangeHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription, StoreError> {
        self.inner.subscribe(path, on_change, on_error).await
    }
}
