//! Marketplace configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BIZAY_OAUTH_PUBLISHABLE_KEY` - OAuth identity service publishable key (`pk_test_...`/`pk_live_...`)
//! - `BIZAY_DATABASE_URL` - Document store base URL (e.g., `https://<project>.firebaseio.com`)
//! - `BIZAY_AUTH_API_KEY` - Password provider API key
//!
//! ## Optional
//! - `BIZAY_DATABASE_AUTH` - Document store auth token
//! - `BIZAY_AUTH_ENDPOINT` - Password provider endpoint (default: identity toolkit v1)
//! - `BIZAY_OPERATION_TIMEOUT_SECS` - Deadline for store and provider calls (default: 20)
//! - `BIZAY_PROVIDER_WAIT_SECS` - How long session resolution waits for providers (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//!
//! A missing or malformed required variable is fatal: the process must not
//! start against a broken identity or store backend.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Default password provider endpoint.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1/";

const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PROVIDER_WAIT_SECS: u64 = 10;
const OPERATION_TIMEOUT_RANGE: (u64, u64) = (1, 120);
const PROVIDER_WAIT_RANGE: (u64, u64) = (1, 60);

/// Publishable key prefixes issued by the OAuth identity service.
const PUBLISHABLE_KEY_PREFIXES: &[&str] = &["pk_test_", "pk_live_"];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Marketplace application configuration.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// OAuth identity service configuration
    pub oauth: OAuthConfig,
    /// Password provider configuration
    pub password_auth: PasswordAuthConfig,
    /// Document store configuration
    pub store: StoreConfig,
    /// Deadline applied to every store and identity provider call
    pub operation_timeout: Duration,
    /// Bounded wait for both identity providers to report during resolution
    pub provider_wait: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// OAuth identity service configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Publishable key (safe to embed in clients)
    pub publishable_key: String,
}

impl OAuthConfig {
    /// Whether the key targets the live (production) instance.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.publishable_key.starts_with("pk_live_")
    }
}

/// Password provider configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct PasswordAuthConfig {
    /// API key sent with every request
    pub api_key: SecretString,
    /// Base endpoint, always ending in `/`
    pub endpoint: Url,
}

impl std::fmt::Debug for PasswordAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthConfig")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Document store configuration.
///
/// Implements `Debug` manually to redact the auth token.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL, always ending in `/`
    pub base_url: Url,
    /// Optional auth token appended to every request
    pub auth_token: Option<SecretString>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl MarketplaceConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let oauth = OAuthConfig {
            publishable_key: validate_publishable_key(
                &env.required("BIZAY_OAUTH_PUBLISHABLE_KEY")?,
            )?,
        };

        let password_auth = PasswordAuthConfig {
            api_key: SecretString::from(env.required("BIZAY_AUTH_API_KEY")?),
            endpoint: parse_base_url(
                "BIZAY_AUTH_ENDPOINT",
                &env.or_default("BIZAY_AUTH_ENDPOINT", DEFAULT_AUTH_ENDPOINT),
            )?,
        };

        let store = StoreConfig {
            base_url: parse_base_url("BIZAY_DATABASE_URL", &env.required("BIZAY_DATABASE_URL")?)?,
            auth_token: env.optional("BIZAY_DATABASE_AUTH").map(SecretString::from),
        };

        let operation_timeout = env.seconds(
            "BIZAY_OPERATION_TIMEOUT_SECS",
            DEFAULT_OPERATION_TIMEOUT_SECS,
            OPERATION_TIMEOUT_RANGE,
        )?;
        let provider_wait = env.seconds(
            "BIZAY_PROVIDER_WAIT_SECS",
            DEFAULT_PROVIDER_WAIT_SECS,
            PROVIDER_WAIT_RANGE,
        )?;

        Ok(Self {
            oauth,
            password_auth,
            store,
            operation_timeout,
            provider_wait,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get an optional variable; blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn seconds(&self, key: &str, default: u64, (min, max): (u64, u64)) -> Result<Duration, ConfigError> {
        let Some(raw) = self.optional(key) else {
            return Ok(Duration::from_secs(default));
        };
        let secs = raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
        if !(min..=max).contains(&secs) {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("must be between {min} and {max} seconds (got {secs})"),
            ));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn validate_publishable_key(key: &str) -> Result<String, ConfigError> {
    let valid = PUBLISHABLE_KEY_PREFIXES
        .iter()
        .any(|prefix| key.len() > prefix.len() && key.starts_with(prefix));
    if !valid {
        return Err(ConfigError::InvalidEnvVar(
            "BIZAY_OAUTH_PUBLISHABLE_KEY".to_string(),
            "must start with pk_test_ or pk_live_".to_string(),
        ));
    }
    Ok(key.to_owned())
}

/// Parse an http(s) base URL and make sure it ends with `/` so that relative
/// joins keep the full path.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must have a host".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BIZAY_OAUTH_PUBLISHABLE_KEY", "pk_test_Y2xlcmsuYml6YXkuZGV2JA"),
            ("BIZAY_DATABASE_URL", "https://bizay-default-rtdb.firebaseio.com"),
            ("BIZAY_AUTH_API_KEY", "AIzaSyTestKey"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<MarketplaceConfig, ConfigError> {
        MarketplaceConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.operation_timeout, Duration::from_secs(20));
        assert_eq!(config.provider_wait, Duration::from_secs(10));
        assert_eq!(
            config.store.base_url.as_str(),
            "https://bizay-default-rtdb.firebaseio.com/"
        );
        assert_eq!(config.password_auth.endpoint.as_str(), DEFAULT_AUTH_ENDPOINT);
        assert!(config.store.auth_token.is_none());
        assert!(!config.oauth.is_live());
    }

    #[test]
    fn test_missing_required_is_fatal() {
        for key in [
            "BIZAY_OAUTH_PUBLISHABLE_KEY",
            "BIZAY_DATABASE_URL",
            "BIZAY_AUTH_API_KEY",
        ] {
            let mut vars = base_vars();
            vars.remove(key);
            let err = load(&vars).unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == key));
        }
    }

    #[test]
    fn test_blank_counts_as_missing() {
        let mut vars = base_vars();
        vars.insert("BIZAY_DATABASE_URL", "   ");
        assert!(matches!(load(&vars), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_invalid_publishable_key() {
        let mut vars = base_vars();
        vars.insert("BIZAY_OAUTH_PUBLISHABLE_KEY", "sk_live_secret");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(_, _))));
        vars.insert("BIZAY_OAUTH_PUBLISHABLE_KEY", "pk_live_");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_invalid_database_url() {
        let mut vars = base_vars();
        vars.insert("BIZAY_DATABASE_URL", "ftp://example.com");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(_, _))));
        vars.insert("BIZAY_DATABASE_URL", "not a url");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_timeout_bounds() {
        let mut vars = base_vars();
        vars.insert("BIZAY_OPERATION_TIMEOUT_SECS", "30");
        assert_eq!(load(&vars).unwrap().operation_timeout, Duration::from_secs(30));

        vars.insert("BIZAY_OPERATION_TIMEOUT_SECS", "0");
        assert!(load(&vars).is_err());

        vars.insert("BIZAY_OPERATION_TIMEOUT_SECS", "soon");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("BIZAY_DATABASE_AUTH", "db-token-123");
        let config = load(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIzaSyTestKey"));
        assert!(!debug.contains("db-token-123"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(
            config.store.auth_token.as_ref().map(ExposeSecret::expose_secret),
            Some("db-token-123")
        );
    }
}
