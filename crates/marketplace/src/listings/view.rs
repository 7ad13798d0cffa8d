//! Live view of one owner's listings.
//!
//! At most one subscription is active per view. It is torn down when the
//! view is dropped, when [`OwnershipView::clear`] is called, or when the view
//! is pointed at a different owner. Subscribe calls on one view run one at
//! a time, so a handler only ever hears from the subscription that is kept.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use bizay_core::PrincipalId;

use super::{Listing, sort_newest_first};
use crate::deadline::within;
use crate::error::{MarketError, Result};
use crate::session::AuthState;
use crate::store::{ChangeHandler, DocumentStore, ErrorHandler, StorePath, Subscription};

/// Receives the full, newest-first listing set after every change.
pub type ListingsHandler = Arc<dyn Fn(Vec<Listing>) + Send + Sync>;

/// Receives subscription failures.
pub type ViewErrorHandler = Arc<dyn Fn(MarketError) + Send + Sync>;

/// The "my listings" screen, minus the rendering.
pub struct OwnershipView {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    active: Mutex<Option<Active>>,
    /// Held across the store round-trip of [`OwnershipView::subscribe`].
    subscribing: AsyncMutex<()>,
}

struct Active {
    owner: PrincipalId,
    _subscription: Subscription,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OwnershipView {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            active: Mutex::new(None),
            subscribing: AsyncMutex::new(()),
        }
    }

    /// The owner currently subscribed to.
    #[must_use]
    pub fn owner(&self) -> Option<PrincipalId> {
        lock(&self.active).as_ref().map(|a| a.owner.clone())
    }

    /// Subscribe to `owner`'s listings.
    ///
    /// Subscribing again to the same owner does nothing and returns `false`.
    /// A different owner replaces the previous subscription, which is torn
    /// down before the new one starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses or does not answer in time; the
    /// view is left with no subscription.
    pub async fn subscribe(
        &self,
        owner: &PrincipalId,
        on_update: ListingsHandler,
        on_error: ViewErrorHandler,
    ) -> Result<bool> {
        let _serial = self.subscribing.lock().await;
        let previous = {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|a| &a.owner == owner) {
                return Ok(false);
            }
            active.take()
        };
        if let Some(previous) = previous {
            debug!(from = %previous.owner, to = %owner, "owner changed, resubscribing");
            drop(previous);
        }

        let listing_owner = owner.clone();
        let on_change: ChangeHandler = Arc::new(move |subtree| {
            let mut listings = Listing::from_children(&listing_owner, subtree);
            sort_newest_first(&mut listings);
            debug!(owner = %listing_owner, count = listings.len(), "listings updated");
            on_update(listings);
        });
        let on_store_error: ErrorHandler = Arc::new(move |err| on_error(MarketError::Store(err)));

        let subscription = within(
            self.timeout,
            "subscribe to listings",
            self.store
                .subscribe(&StorePath::owner_listings(owner), on_change, on_store_error),
        )
        .await?;

        *lock(&self.active) = Some(Active {
            owner: owner.clone(),
            _subscription: subscription,
        });
        info!(owner = %owner, "listings subscription started");
        Ok(true)
    }

    /// Follow the session: subscribe to the signed-in principal's listings,
    /// or clear the view when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Same as [`OwnershipView::subscribe`].
    pub async fn track(
        &self,
        auth: &AuthState,
        on_update: ListingsHandler,
        on_error: ViewErrorHandler,
    ) -> Result<bool> {
        match auth.principal() {
            Some(principal) => self.subscribe(principal, on_update, on_error).await,
            None => Ok(self.clear()),
        }
    }

    /// Tear down the subscription, if any. Returns whether one was active.
    pub fn clear(&self) -> bool {
        let previous = lock(&self.active).take();
        previous.is_some_and(|active| {
            debug!(owner = %active.owner, "listings subscription cleared");
            true
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::store::{CreateOutcome, InMemoryStore, StoreError};

    /// Yields before subscribing so concurrent subscribe calls interleave.
    struct YieldingStore(InMemoryStore);

    #[async_trait]
    impl DocumentStore for YieldingStore {
        async fn read(&self, path: &StorePath) -> std::result::Result<Option<Value>, StoreError> {
            self.0.read(path).await
        }

        async fn write(&self, path: &StorePath, value: Value) -> std::result::Result<(), StoreError> {
            self.0.write(path, value).await
        }

        async fn update(
            &self,
            path: &StorePath,
            fields: Map<String, Value>,
        ) -> std::result::Result<(), StoreError> {
            self.0.update(path, fields).await
        }

        async fn remove(&self, path: &StorePath) -> std::result::Result<(), StoreError> {
            self.0.remove(path).await
        }

        async fn push(&self, path: &StorePath, value: Value) -> std::result::Result<String, StoreError> {
            self.0.push(path, value).await
        }

        async fn create_if_absent(
            &self,
            path: &StorePath,
            value: Value,
        ) -> std::result::Result<CreateOutcome, StoreError> {
            self.0.create_if_absent(path, value).await
        }

        async fn subscribe(
            &self,
            path: &StorePath,
            on_change: ChangeHandler,
            on_error: ErrorHandler,
        ) -> std::result::Result<Subscription, StoreError> {
            tokio::task::yield_now().await;
            self.0.subscribe(path, on_change, on_error).await
        }
    }

    type Seen = Arc<Mutex<Vec<Vec<String>>>>;

    fn recorder() -> (Seen, ListingsHandler, ViewErrorHandler) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        let on_update: ListingsHandler = Arc::new(move |listings: Vec<Listing>| {
            sink.lock()
                .unwrap()
                .push(listings.into_iter().map(|l| l.title).collect());
        });
        let on_error: ViewErrorHandler = Arc::new(|_| {});
        (seen, on_update, on_error)
    }

    fn id(raw: &str) -> PrincipalId {
        PrincipalId::parse(raw).unwrap()
    }

    fn seeded() -> InMemoryStore {
        InMemoryStore::with_tree(json!({
            "products": {
                "u1": {
                    "a": {"title": "Old", "createdAt": "2025-01-01T00:00:00Z"},
                    "b": {"title": "New", "createdAt": "2025-02-01T00:00:00Z"},
                },
                "u2": {"c": {"title": "Other"}},
            }
        }))
    }

    #[tokio::test]
    async fn test_delivers_full_sorted_set_on_every_change() {
        let store = seeded();
        let view = OwnershipView::new(Arc::new(store.clone()), Duration::from_secs(5));
        let (seen, on_update, on_error) = recorder();

        assert!(view.subscribe(&id("u1"), on_update, on_error).await.unwrap());
        store
            .write(
                &StorePath::parse("products/u1/d").unwrap(),
                json!({"title": "Newest", "createdAt": "2025-03-01T00:00:00Z"}),
            )
            .await
            .unwrap();
        store
            .write(
                &StorePath::parse("products/u2/e").unwrap(),
                json!({"title": "Elsewhere"}),
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![
            vec!["New".to_owned(), "Old".to_owned()],
            vec!["Newest".to_owned(), "New".to_owned(), "Old".to_owned()],
        ]);
    }

    #[tokio::test]
    async fn test_same_owner_is_noop_and_owner_change_resubscribes() {
        let store = seeded();
        let view = OwnershipView::new(Arc::new(store.clone()), Duration::from_secs(5));
        let (_, on_update, on_error) = recorder();

        assert!(
            view.subscribe(&id("u1"), Arc::clone(&on_update), Arc::clone(&on_error))
                .await
                .unwrap()
        );
        assert!(
            !view
                .subscribe(&id("u1"), Arc::clone(&on_update), Arc::clone(&on_error))
                .await
                .unwrap()
        );
        assert_eq!(store.subscriber_count(), 1);

        assert!(view.subscribe(&id("u2"), on_update, on_error).await.unwrap());
        assert_eq!(store.subscriber_count(), 1);
        assert_eq!(view.owner(), Some(id("u2")));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_keeps_one_and_delivers_once() {
        let store = seeded();
        let view = OwnershipView::new(
            Arc::new(YieldingStore(store.clone())),
            Duration::from_secs(5),
        );
        let (seen, on_update, on_error) = recorder();

        let (id_a, id_b) = (id("u1"), id("u1"));
        let (a, b) = tokio::join!(
            view.subscribe(&id_a, Arc::clone(&on_update), Arc::clone(&on_error)),
            view.subscribe(&id_b, on_update, on_error),
        );
        let started = [a.unwrap(), b.unwrap()];
        assert_eq!(started.iter().filter(|s| **s).count(), 1);
        assert_eq!(store.subscriber_count(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_and_drop_tear_down() {
        let store = seeded();
        let view = OwnershipView::new(Arc::new(store.clone()), Duration::from_secs(5));
        let (_, on_update, on_error) = recorder();

        view.track(
            &AuthState::Authenticated {
                principal: id("u1"),
                provider: bizay_core::AuthProvider::Password,
            },
            Arc::clone(&on_update),
            Arc::clone(&on_error),
        )
        .await
        .unwrap();
        assert_eq!(store.subscriber_count(), 1);

        let cleared = view
            .track(&AuthState::Guest, Arc::clone(&on_update), Arc::clone(&on_error))
            .await
            .unwrap();
        assert!(cleared);
        assert_eq!(store.subscriber_count(), 0);
        assert!(!view.clear());

        view.subscribe(&id("u1"), on_update, on_error).await.unwrap();
        drop(view);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_store_reports_error() {
        let store = seeded();
        store.set_offline(true);
        let view = OwnershipView::new(Arc::new(store), Duration::from_secs(5));
        let (_, on_update, on_error) = recorder();

        let err = view.subscribe(&id("u1"), on_update, on_error).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProviderUnavailable);
        assert!(view.owner().is_none());
    }
}
