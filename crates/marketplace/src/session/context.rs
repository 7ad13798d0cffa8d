//! Shared session context.
//!
//! One [`SessionContext`] is shared by every view. Views read it through a
//! watch receiver and never write to it; only the resolver-driven
//! [`SessionContext::refresh`], the account operations and
//! [`SessionContext::sign_out`] publish new snapshots.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use bizay_core::{AuthProvider, Email, OAuthStrategy, PrincipalId};

use super::{AuthPrompt, AuthState, Resolution, SessionResolver};
use crate::deadline::within;
use crate::error::{
    Field, MarketError, Result, ValidationError, add_breadcrumb, clear_sentry_user,
    set_sentry_user,
};
use crate::identity::{AuthError, OAuthIdentity, PasswordAuth};
use crate::profile::{ProfileEdit, ProfileService, ProviderHints, SignUpForm, UserProfile};
use crate::submit::SubmitGate;

/// What views see of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub auth: AuthState,
    /// Profile of the authenticated principal, once loaded.
    pub profile: Option<UserProfile>,
}

/// Single source of truth for "who is the current user".
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: SessionResolver,
    oauth: Arc<dyn OAuthIdentity>,
    password: Arc<dyn PasswordAuth>,
    profiles: ProfileService,
    timeout: Duration,
    snapshot: watch::Sender<SessionSnapshot>,
    account_gate: SubmitGate,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        oauth: Arc<dyn OAuthIdentity>,
        password: Arc<dyn PasswordAuth>,
        profiles: ProfileService,
        provider_wait: Duration,
        timeout: Duration,
    ) -> Self {
        let resolver = SessionResolver::new(Arc::clone(&oauth), Arc::clone(&password), provider_wait);
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                resolver,
                oauth,
                password,
                profiles,
                timeout,
                snapshot,
                account_gate: SubmitGate::new(),
            }),
        }
    }

    /// Read-only view of the session for a screen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// The current principal, or the sign-in/sign-up/guest prompt.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::NotAuthenticated` when nobody is signed in.
    pub fn require_principal(&self) -> Result<PrincipalId> {
        self.inner
            .snapshot
            .borrow()
            .auth
            .principal()
            .cloned()
            .ok_or_else(|| MarketError::NotAuthenticated(AuthPrompt::default()))
    }

    /// Re-run resolution and reload the profile. Call on every screen focus.
    ///
    /// If the profile cannot be loaded the previously loaded profile of the
    /// same principal is kept.
    ///
    /// # Errors
    ///
    /// Returns a recoverable error when a provider or the store fails; the
    /// published snapshot is still updated as far as possible.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<SessionSnapshot> {
        let Resolution { state, error } = self.inner.resolver.settle().await;

        let authenticated = match &state {
            AuthState::Authenticated {
                principal,
                provider,
            } => Some((principal.clone(), provider.clone())),
            AuthState::Unresolved | AuthState::Guest => None,
        };
        let Some((principal, provider)) = authenticated else {
            clear_sentry_user();
            let snapshot = self.publish(state, None);
            return error.map_or(Ok(snapshot), Err);
        };

        let hints = self.hints_for(&principal);
        match self
            .inner
            .profiles
            .load_or_materialize(&principal, &provider, &hints)
            .await
        {
            Ok(materialized) => {
                let profile = materialized.into_profile();
                set_sentry_user(
                    &principal,
                    Some(profile.email.as_str()).filter(|e| !e.is_empty()),
                );
                Ok(self.publish(state, Some(profile)))
            }
            Err(err) => {
                warn!(principal = %principal, error = %err, "keeping previous profile");
                let previous = self
                    .inner
                    .snapshot
                    .borrow()
                    .profile
                    .clone()
                    .filter(|p| p.principal == principal);
                self.publish(state, previous);
                Err(err)
            }
        }
    }

    fn hints_for(&self, principal: &PrincipalId) -> ProviderHints {
        let oauth = self.inner.oauth.snapshot();
        if let Some(oauth_principal) = oauth.authoritative_principal()
            && &oauth_principal.id == principal
        {
            return oauth_principal.hints();
        }
        let email = self
            .inner
            .password
            .state()
            .borrow()
            .principal()
            .filter(|p| &p.id == principal)
            .and_then(|p| p.email.as_ref().map(|e| e.as_str().to_owned()));
        ProviderHints {
            email,
            ..ProviderHints::default()
        }
    }

    fn publish(&self, auth: AuthState, profile: Option<UserProfile>) -> SessionSnapshot {
        let snapshot = SessionSnapshot { auth, profile };
        self.inner.snapshot.send_replace(snapshot.clone());
        snapshot
    }

    fn ensure_signed_out(&self) -> Result<()> {
        if self.inner.resolver.current().is_authenticated() {
            return Err(MarketError::AlreadySignedIn);
        }
        Ok(())
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Create a password account and its profile.
    ///
    /// # Errors
    ///
    /// Returns an error if someone is already signed in, the form is invalid,
    /// the provider rejects the account or the store fails.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn sign_up_with_password(&self, form: &SignUpForm) -> Result<SessionSnapshot> {
        self.ensure_signed_out()?;
        let email = form.validate()?;
        let _permit = self.inner.account_gate.begin()?;

        let principal = within(
            self.inner.timeout,
            "sign up",
            self.inner.password.sign_up(&email, &form.password),
        )
        .await?;
        self.inner
            .profiles
            .create_from_sign_up(&principal, form)
            .await?;
        info!(principal = %principal, "password sign-up complete");
        add_breadcrumb("auth", "Signed up", &[("provider", "password")]);

        self.refresh().await
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns an error if someone is already signed in, a field is blank or
    /// the provider rejects the credentials.
    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<SessionSnapshot> {
        self.ensure_signed_out()?;
        ValidationError::require(&[
            (Field::Email, email),
            (Field::Password, password.expose_secret()),
        ])?;
        let email = Email::parse(email)?;
        let _permit = self.inner.account_gate.begin()?;

        within(
            self.inner.timeout,
            "sign in",
            self.inner.password.sign_in(&email, password),
        )
        .await?;
        add_breadcrumb("auth", "Signed in", &[("provider", "password")]);
        self.refresh().await
    }

    /// Sign in (or up) through an OAuth strategy.
    ///
    /// A newly created account gets its profile from the provider's
    /// attributes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::FlowCancelled` if the user abandons the flow, and
    /// provider or store errors otherwise.
    #[instrument(skip(self))]
    pub async fn sign_in_with_oauth(&self, strategy: OAuthStrategy) -> Result<SessionSnapshot> {
        self.ensure_signed_out()?;
        let _permit = self.inner.account_gate.begin()?;

        let flow = within(
            self.inner.timeout,
            "start oauth flow",
            self.inner.oauth.start_flow(strategy),
        )
        .await?;
        let session_id = flow.session_id.ok_or(AuthError::FlowCancelled)?;
        within(
            self.inner.timeout,
            "activate oauth session",
            self.inner.oauth.activate(&session_id),
        )
        .await?;

        if let Some(created) = &flow.new_principal {
            self.inner
                .profiles
                .load_or_materialize(&created.id, &AuthProvider::oauth(strategy), &created.hints())
                .await?;
            info!(principal = %created.id, %strategy, "oauth sign-up complete");
        }
        add_breadcrumb("auth", "Signed in", &[("provider", strategy.name())]);
        self.refresh().await
    }

    /// Apply a profile edit for the current principal.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` without a principal, `SubmissionInFlight`
    /// while another edit is pending, and validation or store errors.
    #[instrument(skip(self, edit))]
    pub async fn edit_profile(&self, edit: &ProfileEdit) -> Result<UserProfile> {
        let principal = self.require_principal()?;
        let _permit = self.inner.account_gate.begin()?;

        let profile = self.inner.profiles.update(&principal, edit).await?;
        let auth = self.inner.snapshot.borrow().auth.clone();
        if auth.principal() == Some(&principal) {
            self.publish(auth, Some(profile.clone()));
        }
        Ok(profile)
    }

    /// Sign out of both providers and clear the session.
    ///
    /// The published session is always cleared, even if a provider fails.
    ///
    /// # Errors
    ///
    /// Returns the first provider failure, after clearing.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let oauth = within(self.inner.timeout, "oauth sign out", self.inner.oauth.sign_out()).await;
        let password = within(
            self.inner.timeout,
            "password sign out",
            self.inner.password.sign_out(),
        )
        .await;

        self.publish(AuthState::Guest, None);
        clear_sentry_user();
        info!("signed out");

        oauth.and(password)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identity::{InMemoryPasswordAuth, LocalOAuthProvider, OAuthPrincipal};
    use crate::store::{DocumentStore, InMemoryStore, StorePath};

    struct Fixture {
        store: InMemoryStore,
        oauth: LocalOAuthProvider,
        password: InMemoryPasswordAuth,
        session: SessionContext,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let oauth = LocalOAuthProvider::loaded();
        let password = InMemoryPasswordAuth::new();
        let session = SessionContext::new(
            Arc::new(oauth.clone()),
            Arc::new(password.clone()),
            ProfileService::new(Arc::new(store.clone()), Duration::from_secs(5)),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        Fixture {
            store,
            oauth,
            password,
            session,
        }
    }

    fn sign_up_form() -> SignUpForm {
        SignUpForm {
            first_name: "Marie".into(),
            last_name: "Leroy".into(),
            email: "marie@example.ht".into(),
            password: SecretString::from("secret1".to_owned()),
            phone: "37001122".into(),
            address: "Delmas 33".into(),
        }
    }

    #[tokio::test]
    async fn test_refresh_as_guest() {
        let f = fixture();
        let snapshot = f.session.refresh().await.unwrap();
        assert_eq!(snapshot.auth, AuthState::Guest);
        assert!(matches!(
            f.session.require_principal(),
            Err(MarketError::NotAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_password_sign_up_publishes_profile() {
        let f = fixture();
        f.password.assign_ids([PrincipalId::parse("u1").unwrap()]);
        let mut view = f.session.subscribe();

        let snapshot = f.session.sign_up_with_password(&sign_up_form()).await.unwrap();
        let profile = snapshot.profile.unwrap();
        assert_eq!(profile.initials.as_str(), "ML");
        assert_eq!(profile.auth_provider, Some(AuthProvider::Password));
        assert!(view.has_changed().unwrap());
        assert_eq!(
            view.borrow_and_update().auth.principal().unwrap().as_str(),
            "u1"
        );
    }

    #[tokio::test]
    async fn test_sign_in_refused_when_already_signed_in() {
        let f = fixture();
        f.session.sign_up_with_password(&sign_up_form()).await.unwrap();
        let err = f
            .session
            .sign_in_with_password("marie@example.ht", &SecretString::from("secret1".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadySignedIn));
    }

    #[tokio::test]
    async fn test_oauth_sign_up_materializes_from_hints() {
        let f = fixture();
        let mut jean = OAuthPrincipal::new(PrincipalId::parse("u2").unwrap(), OAuthStrategy::Google);
        jean.first_name = Some("Jean".into());
        f.oauth.script(jean);

        let snapshot = f.session.sign_in_with_oauth(OAuthStrategy::Google).await.unwrap();
        let profile = snapshot.profile.unwrap();
        assert_eq!(profile.initials.as_str(), "J");
        assert_eq!(
            profile.auth_provider,
            Some(AuthProvider::OAuth("google".into()))
        );
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_oauth_flow() {
        let f = fixture();
        let err = f
            .session
            .sign_in_with_oauth(OAuthStrategy::Facebook)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Auth(AuthError::FlowCancelled)));
        assert!(!f.session.inner.account_gate.is_busy());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_profile() {
        let f = fixture();
        f.session.sign_up_with_password(&sign_up_form()).await.unwrap();
        let before = f.session.snapshot().profile.unwrap();

        f.store.set_offline(true);
        assert!(f.session.refresh().await.is_err());
        assert_eq!(f.session.snapshot().profile, Some(before));
    }

    #[tokio::test]
    async fn test_sign_out_always_clears() {
        let f = fixture();
        f.session.sign_up_with_password(&sign_up_form()).await.unwrap();

        f.password.set_unavailable(true);
        assert!(f.session.sign_out().await.is_err());
        assert_eq!(f.session.snapshot(), SessionSnapshot {
            auth: AuthState::Guest,
            profile: None,
        });
    }

    #[tokio::test]
    async fn test_edit_profile_updates_snapshot() {
        let f = fixture();
        f.session.sign_up_with_password(&sign_up_form()).await.unwrap();

        let mut edit = ProfileEdit::from_profile(&f.session.snapshot().profile.unwrap());
        edit.first_name = "Ana".into();
        edit.last_name = "Joseph".into();
        let profile = f.session.edit_profile(&edit).await.unwrap();

        assert_eq!(profile.initials.as_str(), "AJ");
        assert_eq!(f.session.snapshot().profile, Some(profile));
        let path = StorePath::user(f.session.snapshot().auth.principal().unwrap());
        assert_eq!(f.store.read(&path).await.unwrap().unwrap()["initials"], json!("AJ"));
    }
}
