//! Unified error handling with Sentry integration.
//!
//! Every marketplace operation returns [`MarketError`]. Callers show
//! [`MarketError::user_message`] to the user and call
//! [`MarketError::report`] to log the failure and, for provider failures,
//! capture it to Sentry. Nothing here panics or escapes as an unhandled
//! error; the only fatal failure is missing configuration at startup.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use bizay_core::{EmailError, ListingId, PriceError, PrincipalId};

use crate::identity::AuthError;
use crate::session::AuthPrompt;
use crate::store::StoreError;

/// A form field subject to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Password,
    Phone,
    Address,
    Title,
    Description,
    Price,
    ImageUrl,
    Category,
    Location,
    Contact,
}

impl Field {
    /// Label shown next to the input.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FirstName => "Prénom",
            Self::LastName => "Nom",
            Self::Email => "Email",
            Self::Password => "Mot de passe",
            Self::Phone => "Téléphone",
            Self::Address => "Adresse",
            Self::Title => "Titre",
            Self::Description => "Description",
            Self::Price => "Prix",
            Self::ImageUrl => "Image",
            Self::Category => "Catégorie",
            Self::Location => "Localisation",
            Self::Contact => "Contact",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Form input rejected before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Required fields left blank.
    #[error("missing required fields: {0:?}")]
    MissingFields(Vec<Field>),

    #[error("invalid email: {0}")]
    Email(#[from] EmailError),

    #[error("invalid price: {0}")]
    Price(#[from] PriceError),

    /// Local phone numbers are exactly eight digits.
    #[error("contact must be exactly 8 digits")]
    InvalidContact,
}

impl ValidationError {
    /// Collect the blank fields among `fields`; `Ok` when none are blank.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingFields` listing every blank field.
    pub fn require(fields: &[(Field, &str)]) -> std::result::Result<(), Self> {
        let missing: Vec<Field> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Self::MissingFields(missing))
        }
    }
}

/// Error taxonomy shown to users and used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, timeout or backend failure. Retry is reasonable.
    ProviderUnavailable,
    /// A principal is required but none is resolved.
    NotAuthenticated,
    /// Mutation attempted by someone other than the owner.
    OwnershipViolation,
    /// Input rejected by local validation or by a provider.
    Validation,
    /// Duplicate submission or already-signed-in attempt.
    Conflict,
    /// The target record does not exist.
    NotFound,
}

/// Marketplace operation error.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No principal is resolved; the prompt lists the user's choices.
    #[error("not authenticated")]
    NotAuthenticated(AuthPrompt),

    #[error("{principal} does not own listing {listing}")]
    OwnershipViolation {
        listing: ListingId,
        principal: PrincipalId,
    },

    #[error("listing {0} not found")]
    ListingNotFound(ListingId),

    /// Edits never create a profile; materialization does.
    #[error("profile {0} not found")]
    ProfileNotFound(PrincipalId),

    /// The same form is already being submitted.
    #[error("a submission is already in flight")]
    SubmissionInFlight,

    #[error("already signed in")]
    AlreadySignedIn,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl From<EmailError> for MarketError {
    fn from(err: EmailError) -> Self {
        Self::Validation(ValidationError::Email(err))
    }
}

impl From<PriceError> for MarketError {
    fn from(err: PriceError) -> Self {
        Self::Validation(ValidationError::Price(err))
    }
}

impl MarketError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) | Self::Timeout { .. } => ErrorKind::ProviderUnavailable,
            Self::Auth(err) => match err {
                AuthError::Unavailable(_) | AuthError::Provider(_) | AuthError::TooManyAttempts => {
                    ErrorKind::ProviderUnavailable
                }
                AuthError::EmailAlreadyInUse => ErrorKind::Conflict,
                AuthError::FlowCancelled => ErrorKind::NotAuthenticated,
                AuthError::InvalidEmail(_)
                | AuthError::WeakPassword(_)
                | AuthError::InvalidCredentials
                | AuthError::UserDisabled => ErrorKind::Validation,
            },
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            Self::OwnershipViolation { .. } => ErrorKind::OwnershipViolation,
            Self::ListingNotFound(_) | Self::ProfileNotFound(_) => ErrorKind::NotFound,
            Self::SubmissionInFlight | Self::AlreadySignedIn => ErrorKind::Conflict,
        }
    }

    /// Text safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Store(_) | Self::Timeout { .. } => {
                "Impossible de terminer l'opération. Vérifiez votre connexion et réessayez."
                    .to_string()
            }
            Self::Auth(err) => match err {
                AuthError::InvalidEmail(_) => "Adresse email invalide.".to_string(),
                AuthError::EmailAlreadyInUse => {
                    "Un compte existe déjà avec cette adresse email.".to_string()
                }
                AuthError::WeakPassword(_) => {
                    "Le mot de passe doit contenir au moins 6 caractères.".to_string()
                }
                AuthError::InvalidCredentials => "Email ou mot de passe incorrect.".to_string(),
                AuthError::UserDisabled => "Ce compte a été désactivé.".to_string(),
                AuthError::TooManyAttempts => {
                    "Trop de tentatives. Réessayez plus tard.".to_string()
                }
                AuthError::FlowCancelled => "Connexion annulée.".to_string(),
                AuthError::Unavailable(_) | AuthError::Provider(_) => {
                    "Service d'authentification indisponible. Réessayez.".to_string()
                }
            },
            Self::Validation(err) => match err {
                ValidationError::MissingFields(fields) => {
                    let labels: Vec<&str> = fields.iter().map(|f| f.label()).collect();
                    format!(
                        "Veuillez remplir tous les champs obligatoires : {}.",
                        labels.join(", ")
                    )
                }
                ValidationError::Email(_) => "Adresse email invalide.".to_string(),
                ValidationError::Price(_) => "Le prix doit être un nombre positif.".to_string(),
                ValidationError::InvalidContact => {
                    "Le numéro de contact doit contenir exactement 8 chiffres.".to_string()
                }
            },
            Self::NotAuthenticated(_) => {
                "Vous devez être connecté pour continuer.".to_string()
            }
            Self::OwnershipViolation { .. } => {
                "Vous ne pouvez modifier que vos propres annonces.".to_string()
            }
            Self::ListingNotFound(_) => "Cette annonce n'existe plus.".to_string(),
            Self::ProfileNotFound(_) => {
                "Profil introuvable. Actualisez votre session puis réessayez.".to_string()
            }
            Self::SubmissionInFlight => "Envoi en cours, veuillez patienter.".to_string(),
            Self::AlreadySignedIn => "Vous êtes déjà connecté.".to_string(),
        }
    }

    /// Log the error; provider failures are also captured to Sentry.
    pub fn report(&self) {
        match self.kind() {
            ErrorKind::ProviderUnavailable => {
                let event_id = sentry::capture_error(self);
                tracing::error!(
                    error = %self,
                    sentry_event_id = %event_id,
                    "Operation failed"
                );
            }
            ErrorKind::OwnershipViolation => {
                tracing::warn!(error = %self, "Refused mutation");
            }
            _ => tracing::debug!(error = %self, "Operation rejected"),
        }
    }
}

/// Result type alias for `MarketError`.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Set the Sentry user context from a principal.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(principal: &PrincipalId, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(principal.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a user action.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };
    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }
    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_require_lists_every_blank_field() {
        let err = ValidationError::require(&[
            (Field::Title, "Vélo"),
            (Field::Price, "  "),
            (Field::Contact, ""),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields(vec![Field::Price, Field::Contact])
        );
        assert!(ValidationError::require(&[(Field::Title, "x")]).is_ok());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            MarketError::from(StoreError::Unavailable("down".into())).kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            MarketError::Timeout {
                operation: "read profile",
                after: Duration::from_secs(20)
            }
            .kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            MarketError::NotAuthenticated(AuthPrompt::default()).kind(),
            ErrorKind::NotAuthenticated
        );
        assert_eq!(
            MarketError::OwnershipViolation {
                listing: ListingId::parse("l1").unwrap(),
                principal: PrincipalId::parse("u2").unwrap(),
            }
            .kind(),
            ErrorKind::OwnershipViolation
        );
        assert_eq!(MarketError::SubmissionInFlight.kind(), ErrorKind::Conflict);
        assert_eq!(
            MarketError::from(AuthError::InvalidCredentials).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = MarketError::from(StoreError::PermissionDenied("rules: uid != auth.uid".into()));
        assert!(!err.user_message().contains("rules"));

        let err = MarketError::from(ValidationError::MissingFields(vec![
            Field::FirstName,
            Field::Phone,
        ]));
        assert_eq!(
            err.user_message(),
            "Veuillez remplir tous les champs obligatoires : Prénom, Téléphone."
        );
    }
}
