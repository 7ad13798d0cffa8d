//! Identity Toolkit REST client for email/password accounts.
//!
//! Uses `accounts:signUp` and `accounts:signInWithPassword`. The hosted
//! service reports failures as an error code string (optionally followed by
//! ` : detail`), which is mapped onto [`AuthError`].

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use url::Url;

use bizay_core::{Email, PrincipalId};

use super::{AuthError, PasswordAuth, PasswordPrincipal, PasswordState};
use crate::config::PasswordAuthConfig;

/// Message used when the provider does not explain a weak password.
const DEFAULT_WEAK_PASSWORD: &str = "Password should be at least 6 characters";

/// Client for the hosted password backend.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    endpoint: Url,
    api_key: SecretString,
    state: watch::Sender<PasswordState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl IdentityToolkitClient {
    /// Create a client. The process starts with nobody signed in.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &PasswordAuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bizay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (state, _) = watch::channel(PasswordState::SignedOut);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                state,
            }),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url, AuthError> {
        // "./" keeps `accounts:` from being parsed as a URL scheme.
        let mut url = self
            .inner
            .endpoint
            .join(&format!("./accounts:{method}"))
            .map_err(|e| AuthError::Provider(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", self.inner.api_key.expose_secret());
        Ok(url)
    }

    async fn call(
        &self,
        method: &str,
        email: &Email,
        password: &SecretString,
    ) -> Result<PrincipalId, AuthError> {
        let body = CredentialsRequest {
            email: email.as_str(),
            password: password.expose_secret(),
            return_secure_token: true,
        };
        let response = self
            .inner
            .http
            .post(self.method_url(method)?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorEnvelope>(&text)
                .map_or_else(|_| format!("HTTP {status}"), |envelope| envelope.error.message);
            warn!(method, %code, "password provider rejected request");
            return Err(map_error_code(&code));
        }

        let account: AccountResponse = response
            .json()
            .await
            .map_err(|e| {
                AuthError::Provider(format!("unexpected response: {}", e.without_url()))
            })?;
        let id = PrincipalId::parse(&account.local_id)
            .map_err(|e| AuthError::Provider(format!("invalid account id: {e}")))?;

        self.inner
            .state
            .send_replace(PasswordState::SignedIn(PasswordPrincipal {
                id: id.clone(),
                email: Some(email.clone()),
            }));
        Ok(id)
    }
}

/// Map a provider error code onto [`AuthError`].
fn map_error_code(message: &str) -> AuthError {
    let (code, detail) = message
        .split_once(':')
        .map_or((message.trim(), ""), |(c, d)| (c.trim(), d.trim()));
    match code {
        "EMAIL_EXISTS" => AuthError::EmailAlreadyInUse,
        "INVALID_EMAIL" => AuthError::InvalidEmail(message.to_owned()),
        "WEAK_PASSWORD" => AuthError::WeakPassword(if detail.is_empty() {
            DEFAULT_WEAK_PASSWORD.to_owned()
        } else {
            detail.to_owned()
        }),
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            AuthError::InvalidCredentials
        }
        "USER_DISABLED" => AuthError::UserDisabled,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::TooManyAttempts,
        _ => AuthError::Provider(message.to_owned()),
    }
}

#[async_trait]
impl PasswordAuth for IdentityToolkitClient {
    fn state(&self) -> watch::Receiver<PasswordState> {
        self.inner.state.subscribe()
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<PrincipalId, AuthError> {
        let id = self.call("signUp", email, password).await?;
        info!(principal = %id, "password account created");
        Ok(id)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<PrincipalId, AuthError> {
        self.call("signInWithPassword", email, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        // No tokens are kept, so there is nothing to revoke.
        self.inner.state.send_replace(PasswordState::SignedOut);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> IdentityToolkitClient {
        IdentityToolkitClient::new(&PasswordAuthConfig {
            api_key: SecretString::from("AIzaTest".to_owned()),
            endpoint: Url::parse(crate::config::DEFAULT_AUTH_ENDPOINT).unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn test_method_url() {
        assert_eq!(
            client().method_url("signUp").unwrap().as_str(),
            "https://identitytoolkit.googleapis.com/v1/accounts:signUp?key=AIzaTest"
        );
    }

    #[test]
    fn test_map_error_codes() {
        assert_eq!(map_error_code("EMAIL_EXISTS"), AuthError::EmailAlreadyInUse);
        assert_eq!(
            map_error_code("INVALID_LOGIN_CREDENTIALS"),
            AuthError::InvalidCredentials
        );
        assert_eq!(map_error_code("EMAIL_NOT_FOUND"), AuthError::InvalidCredentials);
        assert_eq!(
            map_error_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakPassword("Password should be at least 6 characters".into())
        );
        assert_eq!(
            map_error_code("TOO_MANY_ATTEMPTS_TRY_LATER"),
            AuthError::TooManyAttempts
        );
        assert!(matches!(
            map_error_code("OPERATION_NOT_ALLOWED"),
            AuthError::Provider(_)
        ));
    }

    #[tokio::test]
    async fn test_starts_signed_out() {
        let client = client();
        assert_eq!(*client.state().borrow(), PasswordState::SignedOut);
        client.sign_out().await.unwrap();
        assert_eq!(*client.state().borrow(), PasswordState::SignedOut);
    }

    #[tokio::test]
    async fn test_connection_failure_hides_api_key() {
        let client = IdentityToolkitClient::new(&PasswordAuthConfig {
            api_key: SecretString::from("AIzaSUPERSECRET".to_owned()),
            endpoint: Url::parse("http://127.0.0.1:9/v1/").unwrap(),
        })
        .unwrap();
        let email = Email::parse("marie@example.ht").unwrap();
        let password = SecretString::from("secret1".to_owned());

        let err = client.sign_in(&email, &password).await.unwrap_err();
        let err = crate::error::MarketError::from(err);
        assert!(!err.to_string().contains("AIzaSUPERSECRET"));
        assert!(!format!("{err:?}").contains("AIzaSUPERSECRET"));
    }
}
