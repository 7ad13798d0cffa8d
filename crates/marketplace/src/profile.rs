//! User profiles and the profile materializer.
//!
//! A profile lives at `users/{principal}`. It is created on first sign-up,
//! or on the first session of an OAuth account that has none yet, and is
//! only ever mutated by an explicit edit. Initials are never stored as an
//! independent value: every write that touches a name writes the matching
//! initials, and every read derives them again from the names.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use bizay_core::{AuthProvider, Email, Initials, PrincipalId};

use crate::deadline::within;
use crate::error::{Field, MarketError, Result, ValidationError};
use crate::store::{CreateOutcome, DocumentStore, StoreError, StorePath};

// =============================================================================
// Types
// =============================================================================

/// A user's canonical profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub principal: PrincipalId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub image_url: String,
    pub initials: Initials,
    /// `None` for records whose provider tag is missing or unknown.
    pub auth_provider: Option<AuthProvider>,
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// "First Last", skipping blank parts.
    #[must_use]
    pub fn display_name(&self) -> String {
        [self.first_name.trim(), self.last_name.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Profile attributes reported by an identity provider.
///
/// Used only as defaults when a profile is first created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderHints {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub image_url: Option<String>,
}

/// Stored shape of `users/{principal}`.
///
/// Every field is optional on read; records written by older releases may
/// lack some of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProfileRecord {
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    address: String,
    image_url: String,
    initials: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

impl ProfileRecord {
    #[allow(clippy::too_many_arguments)]
    fn new(
        first_name: &str,
        last_name: &str,
        email: &str,
        phone: &str,
        address: &str,
        image_url: &str,
        provider: &AuthProvider,
        now: DateTime<Utc>,
    ) -> Self {
        let (first_name, last_name) = (first_name.trim(), last_name.trim());
        Self {
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            email: email.trim().to_owned(),
            phone: phone.trim().to_owned(),
            address: address.trim().to_owned(),
            image_url: image_url.trim().to_owned(),
            initials: Initials::from_names(first_name, last_name).to_string(),
            auth_provider: Some(provider.to_string()),
            created_at: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    fn from_hints(hints: &ProviderHints, provider: &AuthProvider, now: DateTime<Utc>) -> Self {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        Self::new(
            &field(&hints.first_name),
            &field(&hints.last_name),
            &field(&hints.email),
            &field(&hints.phone),
            "",
            &field(&hints.image_url),
            provider,
            now,
        )
    }

    fn decode(value: Value) -> std::result::Result<Self, StoreError> {
        serde_json::from_value(value).map_err(Into::into)
    }

    fn into_profile(self, principal: PrincipalId) -> UserProfile {
        let auth_provider = self.auth_provider.as_deref().and_then(|tag| {
            tag.parse::<AuthProvider>()
                .inspect_err(|e| debug!(principal = %principal, error = %e, "ignoring provider tag"))
                .ok()
        });
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));

        UserProfile {
            initials: Initials::from_names(&self.first_name, &self.last_name),
            principal,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            address: self.address,
            image_url: self.image_url,
            auth_provider,
            created_at,
        }
    }
}

/// Outcome of [`ProfileService::load_or_materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// No profile existed; this one was synthesized and persisted.
    Created(UserProfile),
    /// A persisted profile was found and returned unchanged.
    Existing(UserProfile),
}

impl Materialized {
    #[must_use]
    pub const fn profile(&self) -> &UserProfile {
        match self {
            Self::Created(profile) | Self::Existing(profile) => profile,
        }
    }

    #[must_use]
    pub fn into_profile(self) -> UserProfile {
        match self {
            Self::Created(profile) | Self::Existing(profile) => profile,
        }
    }

    #[must_use]
    pub const fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

// =============================================================================
// Forms
// =============================================================================

/// Password sign-up form. Every field is required.
#[derive(Debug, Clone)]
pub struct SignUpForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: SecretString,
    pub phone: String,
    pub address: String,
}

impl SignUpForm {
    /// Check required fields and parse the email.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for blank fields or a malformed email.
    pub fn validate(&self) -> std::result::Result<Email, ValidationError> {
        ValidationError::require(&[
            (Field::FirstName, self.first_name.as_str()),
            (Field::LastName, self.last_name.as_str()),
            (Field::Email, self.email.as_str()),
            (Field::Password, self.password.expose_secret()),
            (Field::Phone, self.phone.as_str()),
            (Field::Address, self.address.as_str()),
        ])?;
        Ok(Email::parse(&self.email)?)
    }
}

/// Explicit profile edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileEdit {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    /// Replace the avatar when set.
    pub image_url: Option<String>,
}

impl ProfileEdit {
    /// Pre-fill an edit from the current profile.
    #[must_use]
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            phone: profile.phone.clone(),
            address: profile.address.clone(),
            image_url: None,
        }
    }

    fn to_fields(&self) -> std::result::Result<Map<String, Value>, ValidationError> {
        ValidationError::require(&[
            (Field::FirstName, self.first_name.as_str()),
            (Field::LastName, self.last_name.as_str()),
        ])?;
        let (first_name, last_name) = (self.first_name.trim(), self.last_name.trim());

        let mut fields = Map::new();
        fields.insert("firstName".into(), first_name.into());
        fields.insert("lastName".into(), last_name.into());
        fields.insert("phone".into(), self.phone.trim().into());
        fields.insert("address".into(), self.address.trim().into());
        fields.insert(
            "initials".into(),
            Initials::from_names(first_name, last_name).to_string().into(),
        );
        if let Some(image_url) = &self.image_url {
            fields.insert("imageUrl".into(), image_url.trim().into());
        }
        Ok(fields)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Loads, materializes and edits profiles.
#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl ProfileService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Point read of a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the record cannot
    /// be decoded.
    #[instrument(skip(self), fields(principal = %principal))]
    pub async fn load(&self, principal: &PrincipalId) -> Result<Option<UserProfile>> {
        let path = StorePath::user(principal);
        let value = within(self.timeout, "read profile", self.store.read(&path)).await?;
        value
            .map(|v| Ok(ProfileRecord::decode(v)?.into_profile(principal.clone())))
            .transpose()
    }

    /// Return the profile for `principal`, creating it from `hints` if absent.
    ///
    /// Hints never overwrite stored values. If another session creates the
    /// profile between the read and the write, the stored record wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    #[instrument(skip(self, hints), fields(principal = %principal, provider = %provider))]
    pub async fn load_or_materialize(
        &self,
        principal: &PrincipalId,
        provider: &AuthProvider,
        hints: &ProviderHints,
    ) -> Result<Materialized> {
        if let Some(profile) = self.load(principal).await? {
            return Ok(Materialized::Existing(profile));
        }
        let record = ProfileRecord::from_hints(hints, provider, Utc::now());
        self.materialize(principal, record).await
    }

    /// Create the profile for a fresh password account.
    ///
    /// # Errors
    ///
    /// Returns an error if the form is invalid or the store cannot be reached.
    #[instrument(skip(self, form), fields(principal = %principal))]
    pub async fn create_from_sign_up(
        &self,
        principal: &PrincipalId,
        form: &SignUpForm,
    ) -> Result<Materialized> {
        let email = form.validate()?;
        let record = ProfileRecord::new(
            &form.first_name,
            &form.last_name,
            email.as_str(),
            &form.phone,
            &form.address,
            "",
            &AuthProvider::Password,
            Utc::now(),
        );
        self.materialize(principal, record).await
    }

    async fn materialize(&self, principal: &PrincipalId, record: ProfileRecord) -> Result<Materialized> {
        let path = StorePath::user(principal);
        let value = serde_json::to_value(&record).map_err(StoreError::from)?;

        match within(
            self.timeout,
            "create profile",
            self.store.create_if_absent(&path, value),
        )
        .await?
        {
            CreateOutcome::Created => {
                info!(principal = %principal, "profile created");
                Ok(Materialized::Created(record.into_profile(principal.clone())))
            }
            CreateOutcome::Existing(existing) => {
                warn!(principal = %principal, "profile already exists, keeping the stored record");
                let profile = ProfileRecord::decode(existing)?.into_profile(principal.clone());
                Ok(Materialized::Existing(profile))
            }
        }
    }

    /// Apply an explicit edit and return the stored result.
    ///
    /// Initials are recomputed and written in the same update as the names.
    /// The profile must already exist, so a partial record is never created.
    ///
    /// # Errors
    ///
    /// Returns an error if the edit is invalid, the profile does not exist
    /// (`MarketError::ProfileNotFound`) or the store cannot be reached.
    #[instrument(skip(self, edit), fields(principal = %principal))]
    pub async fn update(&self, principal: &PrincipalId, edit: &ProfileEdit) -> Result<UserProfile> {
        let fields = edit.to_fields()?;
        if self.load(principal).await?.is_none() {
            warn!(principal = %principal, "edit refused, no stored profile");
            return Err(MarketError::ProfileNotFound(principal.clone()));
        }
        let path = StorePath::user(principal);
        within(self.timeout, "update profile", self.store.update(&path, fields)).await?;
        info!(principal = %principal, "profile updated");

        self.load(principal)
            .await?
            .ok_or_else(|| MarketError::ProfileNotFound(principal.clone()))
    }
}
