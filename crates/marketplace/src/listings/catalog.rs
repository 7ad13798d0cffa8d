//! Public catalog for guest browsing.
//!
//! The catalog reads every owner's listings in one pass and attaches the
//! seller's first name. Seller lookups are cached using `moka` (5-minute
//! TTL); search, category grouping and filtering run over the loaded
//! entries without further store calls.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use bizay_core::PrincipalId;

use super::Listing;
use crate::deadline::within;
use crate::error::Result;
use crate::profile::ProfileService;
use crate::store::{DocumentStore, StorePath};

/// Seller name shown when the seller has no profile or no first name.
pub const ANONYMOUS_SELLER: &str = "Anonyme";

/// Category used for listings without one.
pub const UNCATEGORIZED: &str = "Autres";

/// A listing with its seller's public details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub listing: Listing,
    pub seller_name: String,
    pub seller_phone: Option<String>,
}

impl CatalogEntry {
    /// Number to call about this listing: the listing's contact, falling back
    /// to the seller's phone.
    #[must_use]
    pub fn seller_contact(&self) -> Option<&str> {
        Some(self.listing.contact.trim())
            .filter(|c| !c.is_empty())
            .or(self.seller_phone.as_deref())
    }

    /// The listing's category, or [`UNCATEGORIZED`].
    #[must_use]
    pub fn category(&self) -> &str {
        self.listing.category.as_deref().unwrap_or(UNCATEGORIZED)
    }

    fn matches(&self, needle: &str) -> bool {
        let listing = &self.listing;
        [
            listing.title.as_str(),
            listing.description.as_str(),
            listing.category.as_deref().unwrap_or_default(),
            listing.location.as_str(),
            self.seller_name.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

/// A category and how many entries it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
struct Seller {
    name: String,
    phone: Option<String>,
}

impl Default for Seller {
    fn default() -> Self {
        Self {
            name: ANONYMOUS_SELLER.to_owned(),
            phone: None,
        }
    }
}

/// Read-only access to every owner's listings.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileService,
    timeout: Duration,
    sellers: Cache<PrincipalId, Seller>,
}

impl Catalog {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, profiles: ProfileService, timeout: Duration) -> Self {
        let sellers = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();
        Self {
            inner: Arc::new(Inner {
                store,
                profiles,
                timeout,
                sellers,
            }),
        }
    }

    /// Load every listing, newest first.
    ///
    /// A seller whose profile cannot be read is shown as anonymous rather
    /// than failing the whole catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the listings cannot be read.
    #[instrument(skip(self))]
    pub async fn browse(&self) -> Result<Vec<CatalogEntry>> {
        let tree = within(
            self.inner.timeout,
            "read catalog",
            self.inner.store.read(&StorePath::all_listings()),
        )
        .await?;
        let Some(Value::Object(owners)) = tree else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for (raw_owner, subtree) in owners {
            let Ok(owner) = PrincipalId::parse(&raw_owner)
                .inspect_err(|e| warn!(owner = %raw_owner, error = %e, "bad owner key"))
            else {
                continue;
            };
            let listings = Listing::from_children(&owner, Some(subtree));
            if listings.is_empty() {
                continue;
            }
            let seller = self.seller(&owner).await;
            entries.extend(listings.into_iter().map(|listing| CatalogEntry {
                listing,
                seller_name: seller.name.clone(),
                seller_phone: seller.phone.clone(),
            }));
        }

        entries.sort_by_key(|entry| Reverse(entry.listing.created_millis()));
        debug!(count = entries.len(), "catalog loaded");
        Ok(entries)
    }

    async fn seller(&self, owner: &PrincipalId) -> Seller {
        if let Some(seller) = self.inner.sellers.get(owner).await {
            debug!(owner = %owner, "Cache hit for seller");
            return seller;
        }

        let seller = match self.inner.profiles.load(owner).await {
            Ok(Some(profile)) => Seller {
                name: Some(profile.first_name.trim())
                    .filter(|n| !n.is_empty())
                    .unwrap_or(ANONYMOUS_SELLER)
                    .to_owned(),
                phone: Some(profile.phone.trim().to_owned()).filter(|p| !p.is_empty()),
            },
            Ok(None) => Seller::default(),
            Err(err) => {
                // Not cached, so the next browse retries.
                warn!(owner = %owner, error = %err, "seller lookup failed");
                return Seller::default();
            }
        };
        self.inner.sellers.insert(owner.clone(), seller.clone()).await;
        seller
    }

    /// Drop cached seller details.
    pub fn invalidate_sellers(&self) {
        self.inner.sellers.invalidate_all();
    }
}

/// Entries whose title, description, category, location or seller name
/// contains `text`, ignoring case. A blank query matches everything.
#[must_use]
pub fn search<'a>(entries: &'a [CatalogEntry], text: &str) -> Vec<&'a CatalogEntry> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return entries.iter().collect();
    }
    entries.iter().filter(|e| e.matches(&needle)).collect()
}

/// Distinct categories, sorted by name, with their entry counts.
#[must_use]
pub fn categories(entries: &[CatalogEntry]) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.category()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, count)| CategoryCount {
            name: name.to_owned(),
            count,
        })
        .collect()
}

/// Entries in `category`; listings without one belong to [`UNCATEGORIZED`].
#[must_use]
pub fn filter_by_category<'a>(entries: &'a [CatalogEntry], category: &str) -> Vec<&'a CatalogEntry> {
    entries.iter().filter(|e| e.category() == category).collect()
}
