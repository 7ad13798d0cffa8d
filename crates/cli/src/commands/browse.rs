//! Guest catalog commands. No sign-in needed.

#![allow(clippy::print_stdout)]

use bizay_marketplace::listings::{CatalogEntry, categories as count_categories, search};
use bizay_marketplace::{Marketplace, MarketError};

use super::listing_line;

/// Print every listing, optionally narrowed by text and category.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub async fn browse(
    market: &Marketplace,
    text: Option<&str>,
    category: Option<&str>,
) -> Result<(), MarketError> {
    let entries = market.catalog().browse().await?;

    let mut shown: Vec<&CatalogEntry> = search(&entries, text.unwrap_or_default());
    if let Some(category) = category {
        shown.retain(|entry| entry.category() == category);
    }

    if shown.is_empty() {
        println!("Aucun produit trouvé.");
        return Ok(());
    }
    println!("{} produit(s) :", shown.len());
    for entry in shown {
        let contact = entry.seller_contact().unwrap_or("-");
        println!(
            "  {}  par {}  tél. {contact}",
            listing_line(&entry.listing),
            entry.seller_name
        );
    }
    Ok(())
}

/// Print categories with their listing counts.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub async fn categories(market: &Marketplace) -> Result<(), MarketError> {
    let entries = market.catalog().browse().await?;
    for category in count_categories(&entries) {
        println!("  {:<20} {}", category.name, category.count);
    }
    Ok(())
}
