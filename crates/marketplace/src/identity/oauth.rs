//! In-process OAuth identity service.
//!
//! The hosted OAuth service only ships browser and mobile SDKs, so processes
//! without one (tests, the CLI) use this provider. Each strategy can be
//! scripted with the account its flow authenticates; an unscripted strategy
//! behaves like a user closing the consent screen.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use bizay_core::{OAuthStrategy, PrincipalId};

use super::{AuthError, OAuthFlow, OAuthIdentity, OAuthPrincipal, OAuthSnapshot};

/// Local [`OAuthIdentity`] implementation.
#[derive(Clone)]
pub struct LocalOAuthProvider {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<OAuthSnapshot>,
    accounts: Mutex<HashMap<OAuthStrategy, OAuthPrincipal>>,
    known: Mutex<HashSet<PrincipalId>>,
    pending: Mutex<HashMap<String, OAuthPrincipal>>,
    unavailable: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for LocalOAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalOAuthProvider {
    /// A provider that is still loading.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(OAuthSnapshot::loading());
        Self {
            inner: Arc::new(Inner {
                state,
                accounts: Mutex::new(HashMap::new()),
                known: Mutex::new(HashSet::new()),
                pending: Mutex::new(HashMap::new()),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// A provider that has finished loading with nobody signed in.
    #[must_use]
    pub fn loaded() -> Self {
        let provider = Self::new();
        provider.finish_loading();
        provider
    }

    /// Mark loading complete, keeping any restored session.
    pub fn finish_loading(&self) {
        self.inner.state.send_modify(|snapshot| snapshot.loaded = true);
    }

    /// Script the account that a flow for `principal.strategy` authenticates.
    pub fn script(&self, principal: OAuthPrincipal) {
        lock(&self.inner.accounts).insert(principal.strategy, principal);
    }

    /// Mark `principal` as an account that already exists upstream.
    pub fn mark_existing(&self, principal: &PrincipalId) {
        lock(&self.inner.known).insert(principal.clone());
    }

    /// Start loaded with `principal` signed in, as after an app restart.
    pub fn restore_session(&self, principal: OAuthPrincipal) {
        self.mark_existing(&principal.id);
        self.inner
            .state
            .send_replace(OAuthSnapshot::signed_in(principal));
    }

    /// Make every call fail as if the service could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_ready(&self) -> Result<(), AuthError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable(
                "identity service unreachable".to_owned(),
            ));
        }
        if !self.inner.state.borrow().loaded {
            return Err(AuthError::Unavailable(
                "identity service still loading".to_owned(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OAuthIdentity for LocalOAuthProvider {
    fn watch(&self) -> watch::Receiver<OAuthSnapshot> {
        self.inner.state.subscribe()
    }

    async fn start_flow(&self, strategy: OAuthStrategy) -> Result<OAuthFlow, AuthError> {
        self.ensure_ready()?;
        let Some(principal) = lock(&self.inner.accounts).get(&strategy).cloned() else {
            debug!(%strategy, "oauth flow abandoned");
            return Ok(OAuthFlow::default());
        };

        let created = lock(&self.inner.known).insert(principal.id.clone());
        let session_id = format!("sess_{}", Uuid::new_v4().simple());
        lock(&self.inner.pending).insert(session_id.clone(), principal.clone());

        Ok(OAuthFlow {
            session_id: Some(session_id),
            new_principal: created.then_some(principal),
        })
    }

    async fn activate(&self, session_id: &str) -> Result<(), AuthError> {
        self.ensure_ready()?;
        let principal = lock(&self.inner.pending)
            .remove(session_id)
            .ok_or_else(|| AuthError::Provider(format!("unknown session {session_id}")))?;
        info!(principal = %principal.id, "oauth session activated");
        self.inner
            .state
            .send_replace(OAuthSnapshot::signed_in(principal));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable(
                "identity service unreachable".to_owned(),
            ));
        }
        self.inner.state.send_replace(OAuthSnapshot::signed_out());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jean() -> OAuthPrincipal {
        let mut p =
            OAuthPrincipal::new(PrincipalId::parse("user_jean").unwrap(), OAuthStrategy::Google);
        p.first_name = Some("Jean".into());
        p
    }

    #[tokio::test]
    async fn test_flow_reports_new_account_once() {
        let provider = LocalOAuthProvider::loaded();
        provider.script(jean());

        let first = provider.start_flow(OAuthStrategy::Google).await.unwrap();
        assert!(first.session_id.is_some());
        assert_eq!(first.new_principal, Some(jean()));

        let second = provider.start_flow(OAuthStrategy::Google).await.unwrap();
        assert!(second.new_principal.is_none());
    }

    #[tokio::test]
    async fn test_unscripted_strategy_is_cancelled() {
        let provider = LocalOAuthProvider::loaded();
        let flow = provider.start_flow(OAuthStrategy::Apple).await.unwrap();
        assert_eq!(flow, OAuthFlow::default());
    }

    #[tokio::test]
    async fn test_activate_signs_in_and_sign_out_clears() {
        let provider = LocalOAuthProvider::loaded();
        provider.script(jean());
        let mut rx = provider.watch();

        let flow = provider.start_flow(OAuthStrategy::Google).await.unwrap();
        provider
            .activate(flow.session_id.as_deref().unwrap())
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().authoritative_principal(),
            Some(&jean())
        );

        provider.sign_out().await.unwrap();
        assert_eq!(provider.snapshot(), OAuthSnapshot::signed_out());
        assert!(provider.activate("sess_unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_not_ready_while_loading_or_unreachable() {
        let provider = LocalOAuthProvider::new();
        assert!(matches!(
            provider.start_flow(OAuthStrategy::Google).await,
            Err(AuthError::Unavailable(_))
        ));

        provider.finish_loading();
        provider.set_unavailable(true);
        assert!(matches!(
            provider.sign_out().await,
            Err(AuthError::Unavailable(_))
        ));
    }
}
