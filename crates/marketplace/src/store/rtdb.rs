//! REST client for the hosted real-time document store.
//!
//! Every path maps to `{base}/{path}.json`. Reads and writes are plain HTTP
//! verbs; live subscriptions use the `text/event-stream` endpoint, whose
//! `put` and `patch` events are applied to a local replica of the subtree so
//! subscribers always receive full snapshots.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, HeaderValue, IF_MATCH};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::memory::{prune, set_segments};
use super::sse::{SseDecoder, SseEvent};
use super::{
    ChangeHandler, CreateOutcome, DocumentStore, ErrorHandler, StoreError, StorePath, Subscription,
    non_empty,
};
use crate::config::StoreConfig;

/// Header asking the store to return an entity tag with a read.
const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

/// Conditional writes retried after losing a race before giving up.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Client for the hosted document store.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct RealtimeDbClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<SecretString>,
}

/// Body of a `POST` response.
#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

/// Payload of a `put` or `patch` stream event.
#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

impl RealtimeDbClient {
    /// Create a client for the configured store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bizay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.base_url.clone(),
                auth_token: config.auth_token.clone(),
            }),
        })
    }

    fn url_for(&self, path: &StorePath) -> Result<Url, StoreError> {
        let mut url = self
            .inner
            .base_url
            .join(&format!("{path}.json"))
            .map_err(|e| StoreError::Decode(format!("cannot build URL for {path}: {e}")))?;
        if let Some(token) = &self.inner.auth_token {
            url.query_pairs_mut()
                .append_pair("auth", token.expose_secret());
        }
        Ok(url)
    }

    /// Read the value at `path` together with its entity tag.
    async fn read_with_etag(&self, path: &StorePath) -> Result<(Option<Value>, String), StoreError> {
        let response = self
            .inner
            .http
            .get(self.url_for(path)?)
            .header(ETAG_REQUEST_HEADER, HeaderValue::from_static("true"))
            .send()
            .await?;
        let response = check_status(response).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| StoreError::Decode("missing ETag header".to_owned()))?;
        let value: Value = response.json().await?;
        Ok((non_empty(value), etag))
    }
}

/// Map non-success responses to store errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(StoreError::PermissionDenied(message))
        }
        _ => Err(StoreError::Unavailable(format!("{status}: {message}"))),
    }
}

#[async_trait]
impl DocumentStore for RealtimeDbClient {
    #[instrument(skip(self), fields(path = %path))]
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let response = self.inner.http.get(self.url_for(path)?).send().await?;
        let value: Value = check_status(response).await?.json().await?;
        Ok(non_empty(value))
    }

    #[instrument(skip(self, value), fields(path = %path))]
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let response = self
            .inner
            .http
            .put(self.url_for(path)?)
            .json(&value)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self, fields), fields(path = %path))]
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let response = self
            .inner
            .http
            .patch(self.url_for(path)?)
            .json(&fields)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let response = self.inner.http.delete(self.url_for(path)?).send().await?;
        check_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(path = %path))]
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let response = self
            .inner
            .http
            .post(self.url_for(path)?)
            .json(&value)
            .send()
            .await?;
        let pushed: PushResponse = check_status(response).await?.json().await?;
        Ok(pushed.name)
    }

    #[instrument(skip(self, value), fields(path = %path))]
    async fn create_if_absent(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<CreateOutcome, StoreError> {
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let (existing, etag) = self.read_with_etag(path).await?;
            if let Some(existing) = existing {
                return Ok(CreateOutcome::Existing(existing));
            }

            let if_match = HeaderValue::from_str(&etag)
                .map_err(|e| StoreError::Decode(format!("invalid ETag: {e}")))?;
            let response = self
                .inner
                .http
                .put(self.url_for(path)?)
                .header(IF_MATCH, if_match)
                .json(&value)
                .send()
                .await?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                debug!(attempt, "conditional create lost a race, re-reading");
                continue;
            }
            check_status(response).await?;
            return Ok(CreateOutcome::Created);
        }

        Err(StoreError::Unavailable(format!(
            "conditional create at {path} kept conflicting"
        )))
    }

    #[instrument(skip(self, on_change, on_error), fields(path = %path))]
    async fn subscribe(
        &self,
        path: &StorePath,
        on_change: ChangeHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription, StoreError> {
        let response = self
            .inner
            .http
            .get(self.url_for(path)?)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?;
        let response = check_status(response).await?;

        let path = path.clone();
        let task = tokio::spawn(async move {
            let mut replica = Value::Null;
            let mut decoder = SseDecoder::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let e = StoreError::from(e);
                        warn!(path = %path, error = %e, "event stream failed");
                        on_error(e);
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    match apply_event(&mut replica, &event) {
                        Ok(StreamStep::Changed) => on_change(non_empty(replica.clone())),
                        Ok(StreamStep::Idle) => {}
                        Err(e @ StoreError::Decode(_)) => {
                            error!(path = %path, error = %e, "undecodable stream event");
                            on_error(e);
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "event stream ended by the store");
                            on_error(e);
                            return;
                        }
                    }
                }
            }
            on_error(StoreError::Unavailable("event stream closed".to_owned()));
        });

        Ok(Subscription::new(move || task.abort()))
    }
}

/// What a stream event did to the replica.
enum StreamStep {
    Changed,
    Idle,
}

fn apply_event(replica: &mut Value, event: &SseEvent) -> Result<StreamStep, StoreError> {
    match event.event.as_str() {
        "put" => {
            let payload: StreamPayload = serde_json::from_str(&event.data)?;
            set_segments(replica, &relative_segments(&payload.path), payload.data);
            prune(replica);
            Ok(StreamStep::Changed)
        }
        "patch" => {
            let payload: StreamPayload = serde_json::from_str(&event.data)?;
            let Value::Object(fields) = payload.data else {
                return Err(StoreError::Decode("patch data is not an object".to_owned()));
            };
            let base = relative_segments(&payload.path);
            for (key, value) in fields {
                let mut segments = base.clone();
                segments.extend(relative_segments(&key));
                set_segments(replica, &segments, value);
            }
            prune(replica);
            Ok(StreamStep::Changed)
        }
        "keep-alive" => Ok(StreamStep::Idle),
        "cancel" => Err(StoreError::PermissionDenied(
            "subscription cancelled by the store".to_owned(),
        )),
        "auth_revoked" => Err(StoreError::PermissionDenied(
            "store credentials revoked".to_owned(),
        )),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            Ok(StreamStep::Idle)
        }
    }
}

fn relative_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
