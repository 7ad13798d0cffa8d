//! Identity provider ports.
//!
//! Two independent providers can authenticate a user:
//!
//! - an OAuth-capable identity service ([`OAuthIdentity`]), which reports
//!   `loaded`/`signed_in` and the current principal with profile attributes
//! - an email/password backend ([`PasswordAuth`]), which pushes the current
//!   principal (or none) through a watch channel
//!
//! Neither provider is aware of the other; merging them is the session
//! resolver's job.

mod memory;
mod oauth;
mod password;

pub use memory::InMemoryPasswordAuth;
pub use oauth::LocalOAuthProvider;
pub use password::IdentityToolkitClient;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::watch;

use bizay_core::{Email, EmailError, OAuthStrategy, PrincipalId};

use crate::profile::ProviderHints;

/// Errors reported by identity providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The email address was rejected.
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// An account already exists for this email.
    #[error("email already in use")]
    EmailAlreadyInUse,

    /// The password does not meet the provider's policy.
    #[error("weak password: {0}")]
    WeakPassword(String),

    /// Unknown email or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account has been disabled.
    #[error("user disabled")]
    UserDisabled,

    /// The provider is throttling this client.
    #[error("too many attempts")]
    TooManyAttempts,

    /// The user abandoned the OAuth flow.
    #[error("oauth flow cancelled")]
    FlowCancelled,

    /// Network failure or the provider is not ready.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// Any other provider-side failure.
    #[error("identity provider error: {0}")]
    Provider(String),
}

impl From<EmailError> for AuthError {
    fn from(err: EmailError) -> Self {
        Self::InvalidEmail(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    /// The request URL is dropped: it carries the API key.
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.without_url().to_string())
    }
}

// =============================================================================
// OAuth identity service
// =============================================================================

/// Principal as reported by the OAuth identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthPrincipal {
    pub id: PrincipalId,
    /// Upstream provider the account signs in with.
    pub strategy: OAuthStrategy,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub primary_email: Option<String>,
    pub primary_phone: Option<String>,
    pub image_url: Option<String>,
}

impl OAuthPrincipal {
    /// A principal with no profile attributes.
    #[must_use]
    pub const fn new(id: PrincipalId, strategy: OAuthStrategy) -> Self {
        Self {
            id,
            strategy,
            first_name: None,
            last_name: None,
            primary_email: None,
            primary_phone: None,
            image_url: None,
        }
    }

    /// Attributes usable as profile defaults.
    #[must_use]
    pub fn hints(&self) -> ProviderHints {
        ProviderHints {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.primary_email.clone(),
            phone: self.primary_phone.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Point-in-time state of the OAuth identity service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthSnapshot {
    pub loaded: bool,
    pub signed_in: bool,
    pub principal: Option<OAuthPrincipal>,
}

impl OAuthSnapshot {
    /// The service has not finished loading.
    #[must_use]
    pub const fn loading() -> Self {
        Self {
            loaded: false,
            signed_in: false,
            principal: None,
        }
    }

    /// Loaded, nobody signed in.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            loaded: true,
            signed_in: false,
            principal: None,
        }
    }

    /// Loaded with an active session.
    #[must_use]
    pub const fn signed_in(principal: OAuthPrincipal) -> Self {
        Self {
            loaded: true,
            signed_in: true,
            principal: Some(principal),
        }
    }

    /// The principal, only if the service is loaded and signed in.
    #[must_use]
    pub fn authoritative_principal(&self) -> Option<&OAuthPrincipal> {
        if self.loaded && self.signed_in {
            self.principal.as_ref()
        } else {
            None
        }
    }
}

/// Result of starting an OAuth flow.
///
/// A flow without a session id was abandoned by the user. `new_principal` is
/// set when the flow created a brand-new account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthFlow {
    pub session_id: Option<String>,
    pub new_principal: Option<OAuthPrincipal>,
}

/// OAuth-capable identity service.
#[async_trait]
pub trait OAuthIdentity: Send + Sync {
    /// Subscribe to state changes.
    fn watch(&self) -> watch::Receiver<OAuthSnapshot>;

    /// Current state.
    fn snapshot(&self) -> OAuthSnapshot {
        self.watch().borrow().clone()
    }

    /// Run the hosted flow for `strategy`.
    async fn start_flow(&self, strategy: OAuthStrategy) -> Result<OAuthFlow, AuthError>;

    /// Make the session created by a flow the active one.
    async fn activate(&self, session_id: &str) -> Result<(), AuthError>;

    /// End the active session.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

// =============================================================================
// Password backend
// =============================================================================

/// Principal signed in through the password backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPrincipal {
    pub id: PrincipalId,
    pub email: Option<Email>,
}

/// State pushed by the password backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PasswordState {
    /// The backend has not reported yet.
    #[default]
    Pending,
    SignedOut,
    SignedIn(PasswordPrincipal),
}

impl PasswordState {
    /// The signed-in principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&PasswordPrincipal> {
        match self {
            Self::SignedIn(principal) => Some(principal),
            Self::Pending | Self::SignedOut => None,
        }
    }

    /// Whether the backend has reported at least once.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Email/password authentication backend.
#[async_trait]
pub trait PasswordAuth: Send + Sync {
    /// Subscribe to state changes.
    fn state(&self) -> watch::Receiver<PasswordState>;

    /// Create an account and sign it in.
    async fn sign_up(&self, email: &Email, password: &SecretString)
    -> Result<PrincipalId, AuthError>;

    /// Sign in to an existing account.
    async fn sign_in(&self, email: &Email, password: &SecretString)
    -> Result<PrincipalId, AuthError>;

    /// Sign out; a no-op when nobody is signed in.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn principal(id: &str) -> OAuthPrincipal {
        OAuthPrincipal::new(PrincipalId::parse(id).unwrap(), OAuthStrategy::Google)
    }

    #[test]
    fn test_authoritative_principal_requires_loaded_and_signed_in() {
        assert!(OAuthSnapshot::loading().authoritative_principal().is_none());
        assert!(OAuthSnapshot::signed_out().authoritative_principal().is_none());

        let half = OAuthSnapshot {
            loaded: false,
            signed_in: true,
            principal: Some(principal("o1")),
        };
        assert!(half.authoritative_principal().is_none());

        let full = OAuthSnapshot::signed_in(principal("o1"));
        assert_eq!(full.authoritative_principal().unwrap().id.as_str(), "o1");
    }

    #[test]
    fn test_password_state_helpers() {
        assert!(!PasswordState::Pending.is_settled());
        assert!(PasswordState::SignedOut.is_settled());
        assert!(PasswordState::SignedOut.principal().is_none());

        let signed_in = PasswordState::SignedIn(PasswordPrincipal {
            id: PrincipalId::parse("p1").unwrap(),
            email: None,
        });
        assert_eq!(signed_in.principal().unwrap().id.as_str(), "p1");
    }

    #[test]
    fn test_hints_copy_attributes() {
        let mut p = principal("o1");
        p.first_name = Some("Jean".into());
        p.primary_email = Some("jean@example.ht".into());
        let hints = p.hints();
        assert_eq!(hints.first_name.as_deref(), Some("Jean"));
        assert_eq!(hints.email.as_deref(), Some("jean@example.ht"));
        assert!(hints.last_name.is_none());
    }
}
