//! Identity provider tags.
//!
//! Every stored profile records which provider authenticated it, as the
//! string `"password"` or `"oauth:<name>"`. Records written by earlier
//! releases used `"firebase"` and `"clerk-<name>"`; those are still read.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth strategies offered on the sign-in and sign-up screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthStrategy {
    Google,
    Apple,
    Facebook,
}

impl OAuthStrategy {
    /// All strategies, in the order the screens list them.
    pub const ALL: [Self; 3] = [Self::Google, Self::Apple, Self::Facebook];

    /// Provider name used in the `oauth:<name>` tag.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
            Self::Facebook => "facebook",
        }
    }
}

impl fmt::Display for OAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error parsing an [`AuthProvider`] tag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown auth provider tag: {0:?}")]
pub struct UnknownProviderTag(pub String);

/// Which identity provider authenticated a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthProvider {
    /// Email/password backend.
    Password,
    /// OAuth-capable identity service, with the upstream provider name.
    OAuth(String),
}

impl AuthProvider {
    /// Tag for a session created through an OAuth strategy.
    #[must_use]
    pub fn oauth(strategy: OAuthStrategy) -> Self {
        Self::OAuth(strategy.name().to_owned())
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password => f.write_str("password"),
            Self::OAuth(name) => write!(f, "oauth:{name}"),
        }
    }
}

impl FromStr for AuthProvider {
    type Err = UnknownProviderTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        match tag {
            "password" | "firebase" => Ok(Self::Password),
            _ => {
                let name = tag
                    .strip_prefix("oauth:")
                    .or_else(|| tag.strip_prefix("clerk-"))
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| UnknownProviderTag(s.to_owned()))?;
                Ok(Self::OAuth(name.to_ascii_lowercase()))
            }
        }
    }
}

impl TryFrom<String> for AuthProvider {
    type Error = UnknownProviderTag;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AuthProvider> for String {
    fn from(provider: AuthProvider) -> Self {
        provider.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_tags() {
        assert_eq!(AuthProvider::Password.to_string(), "password");
        assert_eq!(
            AuthProvider::oauth(OAuthStrategy::Google).to_string(),
            "oauth:google"
        );
    }

    #[test]
    fn test_parse_current_tags() {
        assert_eq!("password".parse(), Ok(AuthProvider::Password));
        assert_eq!(
            "oauth:apple".parse(),
            Ok(AuthProvider::OAuth("apple".to_owned()))
        );
    }

    #[test]
    fn test_parse_legacy_tags() {
        assert_eq!("firebase".parse(), Ok(AuthProvider::Password));
        assert_eq!(
            "clerk-facebook".parse(),
            Ok(AuthProvider::OAuth("facebook".to_owned()))
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert!("oauth:".parse::<AuthProvider>().is_err());
        assert!("ldap".parse::<AuthProvider>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&AuthProvider::oauth(OAuthStrategy::Facebook)).unwrap();
        assert_eq!(json, "\"oauth:facebook\"");
        let back: AuthProvider = serde_json::from_str("\"clerk-google\"").unwrap();
        assert_eq!(back, AuthProvider::OAuth("google".to_owned()));
    }
}
