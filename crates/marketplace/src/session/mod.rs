//! Session resolution.
//!
//! The current user is derived from two independently reporting identity
//! providers with a fixed precedence:
//!
//! 1. the OAuth identity service, when it is loaded and signed in
//! 2. otherwise the password backend, when it reports a principal
//! 3. otherwise nobody
//!
//! [`resolve`] is the only place this merge happens. [`SessionResolver`]
//! adds a bounded wait for providers that have not reported yet, and
//! [`SessionContext`] shares the result (plus the materialized profile)
//! with every view.

mod context;

pub use context::{SessionContext, SessionSnapshot};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use bizay_core::{AuthProvider, PrincipalId};

use crate::error::MarketError;
use crate::identity::{AuthError, OAuthIdentity, OAuthSnapshot, PasswordAuth, PasswordState};

/// Who is using the app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// At least one provider has not reported yet.
    #[default]
    Unresolved,
    /// Both providers reported and nobody is signed in.
    Guest,
    Authenticated {
        principal: PrincipalId,
        provider: AuthProvider,
    },
}

impl AuthState {
    /// The resolved principal, if authenticated.
    #[must_use]
    pub const fn principal(&self) -> Option<&PrincipalId> {
        match self {
            Self::Authenticated { principal, .. } => Some(principal),
            Self::Unresolved | Self::Guest => None,
        }
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Merge both providers' latest state into one [`AuthState`].
#[must_use]
pub fn resolve(oauth: &OAuthSnapshot, password: &PasswordState) -> AuthState {
    if let Some(principal) = oauth.authoritative_principal() {
        return AuthState::Authenticated {
            principal: principal.id.clone(),
            provider: AuthProvider::oauth(principal.strategy),
        };
    }
    if let Some(principal) = password.principal() {
        return AuthState::Authenticated {
            principal: principal.id.clone(),
            provider: AuthProvider::Password,
        };
    }
    if oauth.loaded && password.is_settled() {
        AuthState::Guest
    } else {
        AuthState::Unresolved
    }
}

// =============================================================================
// Authentication prompt
// =============================================================================

/// Choices offered when a screen needs a user and nobody is signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChoice {
    SignIn,
    SignUp,
    ContinueAsGuest,
}

impl AuthChoice {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::SignIn => "Se connecter",
            Self::SignUp => "S'inscrire",
            Self::ContinueAsGuest => "Mode invité",
        }
    }
}

/// The prompt shown instead of silently redirecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrompt {
    pub title: &'static str,
    pub message: &'static str,
    pub choices: [AuthChoice; 3],
}

impl Default for AuthPrompt {
    fn default() -> Self {
        Self {
            title: "Connexion requise",
            message: "Vous devez vous connecter pour accéder à votre compte.",
            choices: [
                AuthChoice::SignIn,
                AuthChoice::SignUp,
                AuthChoice::ContinueAsGuest,
            ],
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Outcome of [`SessionResolver::settle`].
///
/// `state` is never `Unresolved`: if the providers do not report in time the
/// session falls back to `Guest` and `error` explains why.
#[derive(Debug)]
pub struct Resolution {
    pub state: AuthState,
    pub error: Option<MarketError>,
}

/// Resolves the session once both providers have reported.
#[derive(Clone)]
pub struct SessionResolver {
    oauth: Arc<dyn OAuthIdentity>,
    password: Arc<dyn PasswordAuth>,
    wait: Duration,
}

impl SessionResolver {
    #[must_use]
    pub fn new(
        oauth: Arc<dyn OAuthIdentity>,
        password: Arc<dyn PasswordAuth>,
        wait: Duration,
    ) -> Self {
        Self {
            oauth,
            password,
            wait,
        }
    }

    /// Resolve from the providers' current state without waiting.
    #[must_use]
    pub fn current(&self) -> AuthState {
        resolve(&self.oauth.snapshot(), &self.password.state().borrow())
    }

    /// Wait (at most the configured duration) for a definitive state.
    pub async fn settle(&self) -> Resolution {
        let mut oauth_rx = self.oauth.watch();
        let mut password_rx = self.password.state();

        let wait_for_providers = async {
            let (mut oauth_open, mut password_open) = (true, true);
            loop {
                let state = {
                    let oauth = oauth_rx.borrow_and_update();
                    let password = password_rx.borrow_and_update();
                    resolve(&oauth, &password)
                };
                if state != AuthState::Unresolved {
                    return Some(state);
                }
                if !oauth_open && !password_open {
                    return None;
                }
                tokio::select! {
                    changed = oauth_rx.changed(), if oauth_open => oauth_open = changed.is_ok(),
                    changed = password_rx.changed(), if password_open => password_open = changed.is_ok(),
                }
            }
        };

        match tokio::time::timeout(self.wait, wait_for_providers).await {
            Ok(Some(state)) => {
                debug!(?state, "session resolved");
                Resolution { state, error: None }
            }
            Ok(None) => {
                warn!("identity providers shut down before reporting");
                Resolution {
                    state: AuthState::Guest,
                    error: Some(
                        AuthError::Unavailable("identity providers stopped reporting".to_owned())
                            .into(),
                    ),
                }
            }
            Err(_) => {
                warn!(wait = ?self.wait, "identity providers did not report in time");
                Resolution {
                    state: AuthState::Guest,
                    error: Some(MarketError::Timeout {
                        operation: "resolve session",
                        after: self.wait,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bizay_core::OAuthStrategy;

    use super::*;
    use crate::error::ErrorKind;
    use crate::identity::{
        InMemoryPasswordAuth, LocalOAuthProvider, OAuthPrincipal, PasswordPrincipal,
    };

    fn oauth_principal(id: &str) -> OAuthPrincipal {
        OAuthPrincipal::new(PrincipalId::parse(id).unwrap(), OAuthStrategy::Apple)
    }

    fn password_signed_in(id: &str) -> PasswordState {
        PasswordState::SignedIn(PasswordPrincipal {
            id: PrincipalId::parse(id).unwrap(),
            email: None,
        })
    }

    #[test]
    fn test_oauth_wins_when_loaded_and_signed_in() {
        for password in [
            PasswordState::Pending,
            PasswordState::SignedOut,
            password_signed_in("p1"),
        ] {
            let state = resolve(&OAuthSnapshot::signed_in(oauth_principal("o1")), &password);
            assert_eq!(
                state,
                AuthState::Authenticated {
                    principal: PrincipalId::parse("o1").unwrap(),
                    provider: AuthProvider::OAuth("apple".into()),
                }
            );
        }
    }

    #[test]
    fn test_password_used_when_oauth_not_authoritative() {
        for oauth in [OAuthSnapshot::loading(), OAuthSnapshot::signed_out()] {
            let state = resolve(&oauth, &password_signed_in("p1"));
            assert_eq!(state.principal().unwrap().as_str(), "p1");
        }

        // Signed in but not yet loaded does not count.
        let half_loaded = OAuthSnapshot {
            loaded: false,
            signed_in: true,
            principal: Some(oauth_principal("o1")),
        };
        let state = resolve(&half_loaded, &password_signed_in("p1"));
        assert_eq!(state.principal().unwrap().as_str(), "p1");
    }

    #[test]
    fn test_guest_only_once_both_reported() {
        assert_eq!(
            resolve(&OAuthSnapshot::signed_out(), &PasswordState::SignedOut),
            AuthState::Guest
        );
        assert_eq!(
            resolve(&OAuthSnapshot::loading(), &PasswordState::SignedOut),
            AuthState::Unresolved
        );
        assert_eq!(
            resolve(&OAuthSnapshot::signed_out(), &PasswordState::Pending),
            AuthState::Unresolved
        );
    }

    #[test]
    fn test_prompt_offers_three_choices() {
        let prompt = AuthPrompt::default();
        let labels: Vec<&str> = prompt.choices.iter().map(|c| c.label()).collect();
        assert_eq!(labels, ["Se connecter", "S'inscrire", "Mode invité"]);
    }

    #[tokio::test]
    async fn test_settle_waits_for_late_provider() {
        let oauth = LocalOAuthProvider::new();
        let password = InMemoryPasswordAuth::pending();
        let resolver = SessionResolver::new(
            Arc::new(oauth.clone()),
            Arc::new(password.clone()),
            Duration::from_secs(5),
        );
        assert_eq!(resolver.current(), AuthState::Unresolved);

        let pending = tokio::spawn(async move { resolver.settle().await });
        oauth.finish_loading();
        password.settle();

        let resolution = pending.await.unwrap();
        assert_eq!(resolution.state, AuthState::Guest);
        assert!(resolution.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_times_out_to_guest_with_error() {
        let resolver = SessionResolver::new(
            Arc::new(LocalOAuthProvider::new()),
            Arc::new(InMemoryPasswordAuth::new()),
            Duration::from_secs(10),
        );
        let resolution = resolver.settle().await;
        assert_eq!(resolution.state, AuthState::Guest);
        assert_eq!(
            resolution.error.unwrap().kind(),
            ErrorKind::ProviderUnavailable
        );
    }
}
