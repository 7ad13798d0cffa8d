//! Product listings.
//!
//! Listings are stored at `products/{owner}/{listing}`: the owner is a path
//! segment, so every listing has exactly one owner for its whole life.
//! Records also embed the owner as `userId`, which is what the mutation
//! ownership check reads first.
//!
//! - [`OwnershipView`] - live, newest-first list of one owner's listings
//! - [`ListingService`] - publish, edit and delete with the ownership check
//! - [`Catalog`] - read-only browsing of every owner's listings

mod catalog;
mod service;
mod view;

pub use catalog::{
    ANONYMOUS_SELLER, Catalog, CatalogEntry, CategoryCount, UNCATEGORIZED, categories,
    filter_by_category, search,
};
pub use service::ListingService;
pub use view::{ListingsHandler, OwnershipView, ViewErrorHandler};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use bizay_core::{ListingId, Price, PrincipalId};

use crate::error::{Field, ValidationError};
use crate::store::StoreError;

/// Country prefix prepended to local contact numbers.
pub const CONTACT_COUNTRY_PREFIX: &str = "509";

/// Digits in a local contact number.
pub const CONTACT_DIGITS: usize = 8;

/// A listing as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Storage key.
    pub id: ListingId,
    /// Owner from the storage path.
    pub owner: PrincipalId,
    /// Owner embedded in the record, when present.
    pub embedded_owner: Option<PrincipalId>,
    pub title: String,
    pub description: String,
    /// `None` when the stored price is not a number.
    pub price: Option<Price>,
    pub image_url: String,
    pub category: Option<String>,
    pub location: String,
    pub contact: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Decode one stored record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Decode` if the value is not a listing object.
    pub fn from_value(
        owner: &PrincipalId,
        id: ListingId,
        value: Value,
    ) -> Result<Self, StoreError> {
        let record: ListingRecord = serde_json::from_value(value)?;
        Ok(record.into_listing(owner.clone(), id))
    }

    /// Decode every child of an owner's subtree, skipping malformed ones.
    #[must_use]
    pub fn from_children(owner: &PrincipalId, subtree: Option<Value>) -> Vec<Self> {
        let Some(Value::Object(children)) = subtree else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|(key, value)| {
                let id = ListingId::parse(&key)
                    .inspect_err(|e| warn!(owner = %owner, key = %key, error = %e, "bad listing key"))
                    .ok()?;
                Self::from_value(owner, id, value)
                    .inspect_err(|e| warn!(owner = %owner, key = %key, error = %e, "skipping listing"))
                    .ok()
            })
            .collect()
    }

    /// Creation time in epoch milliseconds; a missing timestamp counts as 0.
    #[must_use]
    pub fn created_millis(&self) -> i64 {
        self.created_at.map_or(0, |t| t.timestamp_millis())
    }

    /// The owner used for mutation checks: the embedded field if present,
    /// otherwise `fallback`.
    #[must_use]
    pub fn effective_owner<'a>(&'a self, fallback: &'a PrincipalId) -> &'a PrincipalId {
        self.embedded_owner.as_ref().unwrap_or(fallback)
    }
}

/// Sort newest first. Listings without a timestamp go last; ties keep their
/// relative order.
pub fn sort_newest_first(listings: &mut [Listing]) {
    listings.sort_by_key(|listing| std::cmp::Reverse(listing.created_millis()));
}

/// Stored shape of `products/{owner}/{listing}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListingRecord {
    title: String,
    description: String,
    price: Value,
    image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    location: String,
    contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl ListingRecord {
    fn into_listing(self, owner: PrincipalId, id: ListingId) -> Listing {
        Listing {
            embedded_owner: self
                .user_id
                .as_deref()
                .and_then(|raw| PrincipalId::parse(raw).ok()),
            price: Price::from_json(&self.price).ok(),
            created_at: self
                .created_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc)),
            category: self.category.filter(|c| !c.trim().is_empty()),
            id,
            owner,
            title: self.title,
            description: self.description,
            image_url: self.image_url,
            location: self.location,
            contact: self.contact,
        }
    }
}

// =============================================================================
// Forms
// =============================================================================

/// Publish form. Every field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub price: String,
    pub image_url: String,
    pub category: String,
    pub location: String,
    /// Local eight-digit number, without country prefix.
    pub contact: String,
}

impl ListingDraft {
    /// Validate the form and build the record to store.
    fn to_record(
        &self,
        owner: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<ListingRecord, ValidationError> {
        ValidationError::require(&[
            (Field::Title, self.title.as_str()),
            (Field::Description, self.description.as_str()),
            (Field::Price, self.price.as_str()),
            (Field::ImageUrl, self.image_url.as_str()),
            (Field::Category, self.category.as_str()),
            (Field::Location, self.location.as_str()),
            (Field::Contact, self.contact.as_str()),
        ])?;
        let contact = self.contact.trim();
        if contact.len() != CONTACT_DIGITS || !contact.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidContact);
        }
        let price = Price::parse(&self.price)?;

        Ok(ListingRecord {
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            price: Value::String(price.to_store_string()),
            image_url: self.image_url.trim().to_owned(),
            category: Some(self.category.trim().to_owned()),
            location: self.location.trim().to_owned(),
            contact: format!("{CONTACT_COUNTRY_PREFIX}{contact}"),
            created_at: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            user_id: Some(owner.to_string()),
        })
    }
}

/// Edit form. Title and price are required; the other fields replace the
/// stored values after trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPatch {
    pub title: String,
    pub price: String,
    pub description: String,
    pub image_url: String,
    pub location: String,
    pub contact: String,
}

impl ListingPatch {
    /// Pre-fill an edit from a listing.
    #[must_use]
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            title: listing.title.clone(),
            price: listing
                .price
                .map(|p| p.to_store_string())
                .unwrap_or_default(),
            description: listing.description.clone(),
            image_url: listing.image_url.clone(),
            location: listing.location.clone(),
            contact: listing.contact.clone(),
        }
    }

    fn to_fields(&self) -> Result<Map<String, Value>, ValidationError> {
        ValidationError::require(&[
            (Field::Title, self.title.as_str()),
            (Field::Price, self.price.as_str()),
        ])?;
        let price = Price::parse(&self.price)?;

        let mut fields = Map::new();
        fields.insert("title".into(), self.title.trim().into());
        fields.insert("price".into(), price.to_store_string().into());
        fields.insert("description".into(), self.description.trim().into());
        fields.insert("imageUrl".into(), self.image_url.trim().into());
        fields.insert("location".into(), self.location.trim().into());
        fields.insert("contact".into(), self.contact.trim().into());
        Ok(fields)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn owner() -> PrincipalId {
        PrincipalId::parse("u1").unwrap()
    }

    fn draft() -> ListingDraft {
        ListingDraft {
            title: " Vélo ".into(),
            description: "Bon état".into(),
            price: "7 500".into(),
            image_url: "https://img.example/velo.jpg".into(),
            category: "Sport".into(),
            location: "Cap-Haïtien".into(),
            contact: "37123456".into(),
        }
    }

    #[test]
    fn test_draft_builds_record() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let record = serde_json::to_value(draft().to_record(&owner(), now).unwrap()).unwrap();
        assert_eq!(record["title"], "Vélo");
        assert_eq!(record["price"], "7500");
        assert_eq!(record["contact"], "50937123456");
        assert_eq!(record["userId"], "u1");
        assert_eq!(record["createdAt"], "2025-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_draft_requires_every_field() {
        let mut d = draft();
        d.category = String::new();
        d.image_url = " ".into();
        assert_eq!(
            d.to_record(&owner(), Utc::now()).unwrap_err(),
            ValidationError::MissingFields(vec![Field::ImageUrl, Field::Category])
        );
    }

    #[test]
    fn test_draft_contact_must_be_eight_digits() {
        for bad in ["3712345", "371234567", "3712 456", "5093712345"] {
            let mut d = draft();
            d.contact = bad.into();
            assert_eq!(
                d.to_record(&owner(), Utc::now()).unwrap_err(),
                ValidationError::InvalidContact,
                "{bad}"
            );
        }
    }

    #[test]
    fn test_patch_requires_title_and_price() {
        let patch = ListingPatch {
            title: "Radio".into(),
            ..ListingPatch::default()
        };
        assert_eq!(
            patch.to_fields().unwrap_err(),
            ValidationError::MissingFields(vec![Field::Price])
        );
    }

    #[test]
    fn test_sort_newest_first_with_missing_timestamps_last() {
        let subtree = json!({
            "a": {"title": "T2", "createdAt": "2025-01-03T00:00:00Z"},
            "b": {"title": "T0"},
            "c": {"title": "T1", "createdAt": "2025-01-02T00:00:00Z"},
        });
        let mut listings = Listing::from_children(&owner(), Some(subtree));
        sort_newest_first(&mut listings);
        let titles: Vec<&str> = listings.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["T2", "T1", "T0"]);
    }

    #[test]
    fn test_lenient_decoding() {
        let subtree = json!({
            "l1": {"title": "Radio", "price": 250, "createdAt": "yesterday", "category": ""},
            "l2": "not a listing",
        });
        let listings = Listing::from_children(&owner(), Some(subtree));
        assert_eq!(listings.len(), 1);
        let radio = &listings[0];
        assert_eq!(radio.price, Some(Price::parse("250").unwrap()));
        assert_eq!(radio.created_millis(), 0);
        assert!(radio.category.is_none());
        assert_eq!(radio.effective_owner(&owner()), &owner());
    }
}
