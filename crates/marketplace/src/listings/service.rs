//! Listing mutations.
//!
//! Every mutation needs a resolved principal. Edits and deletes also require
//! that principal to own the listing; a mismatch is refused before anything
//! is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use bizay_core::{ListingId, PrincipalId};

use super::{Listing, ListingDraft, ListingPatch};
use crate::deadline::within;
use crate::error::{MarketError, Result, add_breadcrumb};
use crate::session::SessionContext;
use crate::store::{DocumentStore, StoreError, StorePath};
use crate::submit::SubmitGate;

/// Publish, edit and delete listings for the session's principal.
#[derive(Clone)]
pub struct ListingService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
    timeout: Duration,
    gate: SubmitGate,
}

impl ListingService {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, session: SessionContext, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                session,
                timeout,
                gate: SubmitGate::new(),
            }),
        }
    }

    /// Fetch one listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record cannot be decoded.
    #[instrument(skip(self), fields(owner = %owner, listing = %listing))]
    pub async fn get(&self, owner: &PrincipalId, listing: &ListingId) -> Result<Option<Listing>> {
        let value = within(
            self.inner.timeout,
            "read listing",
            self.inner.store.read(&StorePath::listing(owner, listing)),
        )
        .await?;
        value
            .map(|v| Listing::from_value(owner, listing.clone(), v))
            .transpose()
            .map_err(MarketError::from)
    }

    /// Publish a new listing under the current principal.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` without a principal, validation errors
    /// before any write, `SubmissionInFlight` while another publish is
    /// pending, and store errors.
    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn publish(&self, draft: &ListingDraft) -> Result<ListingId> {
        let owner = self.inner.session.require_principal()?;
        let record = draft.to_record(&owner, Utc::now())?;
        let _permit = self.inner.gate.begin()?;

        let value = serde_json::to_value(record).map_err(StoreError::from)?;
        let key = within(
            self.inner.timeout,
            "publish listing",
            self.inner.store.push(&StorePath::owner_listings(&owner), value),
        )
        .await?;
        let id = ListingId::parse(&key)
            .map_err(|e| StoreError::Decode(format!("store generated key {key:?}: {e}")))?;

        info!(owner = %owner, listing = %id, "listing published");
        add_breadcrumb("listing", "Published listing", &[("listing", id.as_str())]);
        Ok(id)
    }

    /// Apply an edit to a listing the current principal owns.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated`, validation errors, `ListingNotFound`,
    /// `OwnershipViolation` (nothing is written), `SubmissionInFlight` and
    /// store errors.
    #[instrument(skip(self, patch), fields(owner = %owner, listing = %listing))]
    pub async fn update(
        &self,
        owner: &PrincipalId,
        listing: &ListingId,
        patch: &ListingPatch,
    ) -> Result<()> {
        let principal = self.inner.session.require_principal()?;
        let fields = patch.to_fields()?;
        let _permit = self.inner.gate.begin()?;

        self.authorize(&principal, owner, listing).await?;
        within(
            self.inner.timeout,
            "update listing",
            self.inner
                .store
                .update(&StorePath::listing(owner, listing), fields),
        )
        .await?;

        info!(listing = %listing, "listing updated");
        add_breadcrumb("listing", "Edited listing", &[("listing", listing.as_str())]);
        Ok(())
    }

    /// Delete a listing the current principal owns.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated`, `ListingNotFound`, `OwnershipViolation`
    /// (nothing is removed), `SubmissionInFlight` and store errors.
    #[instrument(skip(self), fields(owner = %owner, listing = %listing))]
    pub async fn delete(&self, owner: &PrincipalId, listing: &ListingId) -> Result<()> {
        let principal = self.inner.session.require_principal()?;
        let _permit = self.inner.gate.begin()?;

        self.authorize(&principal, owner, listing).await?;
        within(
            self.inner.timeout,
            "delete listing",
            self.inner.store.remove(&StorePath::listing(owner, listing)),
        )
        .await?;

        info!(listing = %listing, "listing deleted");
        add_breadcrumb("listing", "Deleted listing", &[("listing", listing.as_str())]);
        Ok(())
    }

    /// Load the listing and check that `principal` owns it.
    async fn authorize(
        &self,
        principal: &PrincipalId,
        owner: &PrincipalId,
        listing: &ListingId,
    ) -> Result<Listing> {
        let existing = self
            .get(owner, listing)
            .await?
            .ok_or_else(|| MarketError::ListingNotFound(listing.clone()))?;

        if existing.effective_owner(owner) != principal {
            let err = MarketError::OwnershipViolation {
                listing: listing.clone(),
                principal: principal.clone(),
            };
            err.report();
            return Err(err);
        }
        Ok(existing)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bizay_core::Email;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::identity::{InMemoryPasswordAuth, LocalOAuthProvider};
    use crate::profile::ProfileService;
    use crate::store::InMemoryStore;

    struct Fixture {
        store: InMemoryStore,
        session: SessionContext,
        listings: ListingService,
    }

    async fn signed_in_as(id: &str) -> Fixture {
        let store = InMemoryStore::new();
        let password = InMemoryPasswordAuth::new();
        let principal = PrincipalId::parse(id).unwrap();
        password.register(principal, Email::parse("seller@example.ht").unwrap(), "secret1");

        let timeout = Duration::from_secs(5);
        let session = SessionContext::new(
            Arc::new(LocalOAuthProvider::loaded()),
            Arc::new(password),
            ProfileService::new(Arc::new(store.clone()), timeout),
            timeout,
            timeout,
        );
        session
            .sign_in_with_password("seller@example.ht", &SecretString::from("secret1".to_owned()))
            .await
            .unwrap();
        let listings = ListingService::new(Arc::new(store.clone()), session.clone(), timeout);
        Fixture {
            store,
            session,
            listings,
        }
    }

    fn draft() -> ListingDraft {
        ListingDraft {
            title: "Vélo".into(),
            description: "Bon état".into(),
            price: "7500".into(),
            image_url: "https://img.example/velo.jpg".into(),
            category: "Sport".into(),
            location: "Jacmel".into(),
            contact: "37123456".into(),
        }
    }

    fn id(raw: &str) -> PrincipalId {
        PrincipalId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_edit_own_listing() {
        let f = signed_in_as("u1").await;
        let listing = f.listings.publish(&draft()).await.unwrap();

        let stored = f.listings.get(&id("u1"), &listing).await.unwrap().unwrap();
        assert_eq!(stored.embedded_owner, Some(id("u1")));
        assert_eq!(stored.contact, "50937123456");

        let mut patch = ListingPatch::from_listing(&stored);
        patch.title = "Vélo rouge".into();
        f.listings.update(&id("u1"), &listing, &patch).await.unwrap();
        let edited = f.listings.get(&id("u1"), &listing).await.unwrap().unwrap();
        assert_eq!(edited.title, "Vélo rouge");
        assert_eq!(edited.created_at, stored.created_at);
    }

    #[tokio::test]
    async fn test_publish_requires_principal() {
        let f = signed_in_as("u1").await;
        f.session.sign_out().await.unwrap();
        let err = f.listings.publish(&draft()).await.unwrap_err();
        assert!(matches!(err, MarketError::NotAuthenticated(_)));
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_draft_never_reaches_store() {
        let f = signed_in_as("u1").await;
        let writes = f.store.write_count();
        let mut d = draft();
        d.price = "gratuit".into();
        let err = f.listings.publish(&d).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_foreign_listing_is_refused_without_write() {
        let f = signed_in_as("u2").await;
        let path = StorePath::parse("products/u1/l1").unwrap();
        f.store
            .write(&path, json!({"title": "Radio", "price": "250", "userId": "u1"}))
            .await
            .unwrap();
        let writes = f.store.write_count();
        let listing = ListingId::parse("l1").unwrap();

        let patch = ListingPatch {
            title: "Mine now".into(),
            price: "1".into(),
            ..ListingPatch::default()
        };
        let err = f.listings.update(&id("u1"), &listing, &patch).await.unwrap_err();
        assert!(matches!(err, MarketError::OwnershipViolation { .. }));

        let err = f.listings.delete(&id("u1"), &listing).await.unwrap_err();
        assert!(matches!(err, MarketError::OwnershipViolation { .. }));

        assert_eq!(f.store.write_count(), writes);
        assert_eq!(f.store.read(&path).await.unwrap().unwrap()["title"], "Radio");
    }

    #[tokio::test]
    async fn test_embedded_owner_takes_precedence() {
        // Stored under u2's subtree but stamped with u1.
        let f = signed_in_as("u2").await;
        f.store
            .write(
                &StorePath::parse("products/u2/l9").unwrap(),
                json!({"title": "Odd", "price": "5", "userId": "u1"}),
            )
            .await
            .unwrap();
        let err = f
            .listings
            .delete(&id("u2"), &ListingId::parse("l9").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_and_own_listing() {
        let f = signed_in_as("u1").await;
        let missing = ListingId::parse("nope").unwrap();
        assert!(matches!(
            f.listings.delete(&id("u1"), &missing).await,
            Err(MarketError::ListingNotFound(_))
        ));

        let listing = f.listings.publish(&draft()).await.unwrap();
        f.listings.delete(&id("u1"), &listing).await.unwrap();
        assert!(f.listings.get(&id("u1"), &listing).await.unwrap().is_none());
    }
}
