//! Document store port and implementations.
//!
//! The marketplace keeps all persistent data in a remote, schemaless,
//! real-time document tree. Two subtrees are used:
//!
//! - `users/{principal}` - one profile record per principal
//! - `products/{owner}/{listing}` - listings nested under their owner
//!
//! Ownership of a listing is structural: the owner id is a path segment, not
//! a reference field that needs integrity maintenance.
//!
//! # Implementations
//!
//! - [`InMemoryStore`] - JSON tree held in process, used by tests and demos
//! - [`RealtimeDbClient`] - REST + server-sent-events client for the hosted store

mod memory;
mod rtdb;
mod sse;

pub use memory::InMemoryStore;
pub use rtdb::RealtimeDbClient;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use bizay_core::{ListingId, PrincipalId};
use bizay_core::types::id::{IdError, validate_key};

/// Errors that can occur when talking to the document store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Network failure, timeout or server error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request for this caller.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A path segment is not a valid store key.
    #[error("invalid path segment {segment:?}: {source}")]
    InvalidPath {
        /// The offending segment.
        segment: String,
        /// Why it was rejected.
        source: IdError,
    },

    /// The store returned data that could not be decoded.
    #[error("unexpected store response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    /// The request URL is dropped: it carries the store token.
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.without_url().to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A validated location in the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Root of all user profiles.
    pub const USERS: &'static str = "users";
    /// Root of all listings.
    pub const PRODUCTS: &'static str = "products";

    /// Build a path from raw segments.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if any segment is blank or contains
    /// a reserved character.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .map(|segment: String| match validate_key(&segment) {
                Ok(()) => Ok(segment),
                Err(source) => Err(StoreError::InvalidPath { segment, source }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Parse a `/`-separated path; leading and trailing slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` for empty segments such as `a//b`.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(trimmed.split('/'))
    }

    /// The root of the tree.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// `users/{principal}`
    #[must_use]
    pub fn user(principal: &PrincipalId) -> Self {
        Self {
            segments: vec![Self::USERS.to_owned(), principal.to_string()],
        }
    }

    /// `products`
    #[must_use]
    pub fn all_listings() -> Self {
        Self {
            segments: vec![Self::PRODUCTS.to_owned()],
        }
    }

    /// `products/{owner}`
    #[must_use]
    pub fn owner_listings(owner: &PrincipalId) -> Self {
        Self {
            segments: vec![Self::PRODUCTS.to_owned(), owner.to_string()],
        }
    }

    /// `products/{owner}/{listing}`
    #[must_use]
    pub fn listing(owner: &PrincipalId, listing: &ListingId) -> Self {
        Self {
            segments: vec![
                Self::PRODUCTS.to_owned(),
                owner.to_string(),
                listing.to_string(),
            ],
        }
    }

    /// Append a validated child segment.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if the segment is not a valid key.
    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        validate_key(segment).map_err(|source| StoreError::InvalidPath {
            segment: segment.to_owned(),
            source,
        })?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        Ok(Self { segments })
    }

    /// The path's segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this path is `other` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Whether a change at `other` can alter the value at `self`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.is_ancestor_or_self(other) || other.is_ancestor_or_self(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The value was written.
    Created,
    /// A value was already present; it was left untouched and is returned.
    Existing(Value),
}

/// Callback receiving the full value at a subscribed path (`None` = absent).
pub type ChangeHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Callback receiving subscription failures.
pub type ErrorHandler = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Owned handle to a live subscription.
///
/// The subscription is torn down by [`Subscription::unsubscribe`] or when the
/// handle is dropped, whichever comes first.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a teardown closure.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Tear the subscription down now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The external document store.
///
/// Every method is an asynchronous boundary. Implementations deliver the
/// current value to a new subscriber right away and then the full value
/// again after every change that touches the subscribed path.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read; `None` when nothing is stored at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`.
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path`.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Delete the value at `path`.
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Store `value` under a freshly generated child key of `path`.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Write `value` only if nothing is stored at `path` yet.
    async fn create_if_absent(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<CreateOutcome, StoreError>;

    /// Subscribe to the value at `path`.
    async fn subscribe(
        &self,
        path: &StorePath,
        on_change: ChangeHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription, StoreError>;
}

/// Treat `null` and `{}` as absent, as the hosted store does.
pub(crate) fn non_empty(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(other),
    }
}
