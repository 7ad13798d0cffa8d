//! Listing commands for the signed-in owner.
//!
//! # Usage
//!
//! ```bash
//! bizay listings -e marie@example.ht -p secret1 --watch
//! bizay publish -e marie@example.ht -p secret1 --title Vélo --description "Bon état" \
//!     --price 7500 --image-url https://img.example/velo.jpg --category Sport \
//!     --location Jacmel --contact 37123456
//! bizay edit -e marie@example.ht -p secret1 -l <listing> --price 7000
//! bizay delete -e marie@example.ht -p secret1 -l <listing>
//! ```

#![allow(clippy::print_stdout)]

use std::sync::Arc;

use clap::Args;
use tokio::sync::mpsc;
use tracing::info;

use bizay_core::{ListingId, PrincipalId};
use bizay_marketplace::listings::{
    Listing, ListingDraft, ListingPatch, ListingsHandler, ViewErrorHandler,
};
use bizay_marketplace::session::AuthPrompt;
use bizay_marketplace::{Marketplace, MarketError};

use super::account::sign_in;
use super::{CliError, Credentials, listing_line};

/// Arguments for `bizay publish`.
#[derive(Args)]
pub struct PublishArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub description: String,

    /// Price in gourdes
    #[arg(long)]
    pub price: String,

    #[arg(long)]
    pub image_url: String,

    #[arg(long)]
    pub category: String,

    #[arg(long)]
    pub location: String,

    /// Local 8-digit phone number
    #[arg(long)]
    pub contact: String,
}

/// Arguments for `bizay edit`. Omitted fields keep their current value.
#[derive(Args)]
pub struct EditArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    /// Listing to edit
    #[arg(short, long)]
    pub listing: String,

    /// Owner of the listing (defaults to the signed-in user)
    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub price: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub image_url: Option<String>,

    #[arg(long)]
    pub location: Option<String>,

    #[arg(long)]
    pub contact: Option<String>,
}

/// Arguments for `bizay delete`.
#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub credentials: Credentials,

    /// Listing to delete
    #[arg(short, long)]
    pub listing: String,

    /// Owner of the listing (defaults to the signed-in user)
    #[arg(long)]
    pub owner: Option<String>,
}

/// Print the owner's listings, once or after every change.
///
/// # Errors
///
/// Returns an error if sign-in or the subscription fails.
pub async fn mine(
    market: &Marketplace,
    credentials: &Credentials,
    watch: bool,
) -> Result<(), CliError> {
    sign_in(market, credentials).await?;
    let auth = market.session().snapshot().auth;

    let (tx, mut rx) = mpsc::unbounded_channel::<Result<Vec<Listing>, MarketError>>();
    let updates = tx.clone();
    let on_update: ListingsHandler = Arc::new(move |listings| {
        let _ = updates.send(Ok(listings));
    });
    let on_error: ViewErrorHandler = Arc::new(move |err| {
        let _ = tx.send(Err(err));
    });

    let view = market.ownership_view();
    view.track(&auth, on_update, on_error).await?;

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(Ok(listings)) => {
                    print_listings(&listings);
                    if !watch {
                        break;
                    }
                }
                Some(Err(err)) => {
                    view.clear();
                    return Err(err.into());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if watch => {
                info!("stopping watch");
                break;
            }
        }
    }

    view.clear();
    Ok(())
}

fn print_listings(listings: &[Listing]) {
    if listings.is_empty() {
        println!("Aucune annonce.");
        return;
    }
    println!("{} annonce(s) :", listings.len());
    for listing in listings {
        println!("  {}", listing_line(listing));
    }
}

/// Publish a listing.
///
/// # Errors
///
/// Returns an error if sign-in fails, the draft is invalid or the store
/// refuses the write.
pub async fn publish(market: &Marketplace, args: &PublishArgs) -> Result<(), CliError> {
    sign_in(market, &args.credentials).await?;
    let draft = ListingDraft {
        title: args.title.clone(),
        description: args.description.clone(),
        price: args.price.clone(),
        image_url: args.image_url.clone(),
        category: args.category.clone(),
        location: args.location.clone(),
        contact: args.contact.clone(),
    };
    let id = market.listings().publish(&draft).await?;
    println!("Annonce publiée : {id}");
    Ok(())
}

/// Edit one of the signed-in user's listings.
///
/// # Errors
///
/// Returns an error if the listing is missing, owned by someone else or the
/// edit is invalid.
pub async fn edit(market: &Marketplace, args: &EditArgs) -> Result<(), CliError> {
    let snapshot = sign_in(market, &args.credentials).await?;
    let owner = owner_or_self(args.owner.as_deref(), snapshot.auth.principal())?;
    let listing = ListingId::parse(&args.listing)?;

    let current = market
        .listings()
        .get(&owner, &listing)
        .await?
        .ok_or_else(|| MarketError::ListingNotFound(listing.clone()))?;

    let mut patch = ListingPatch::from_listing(&current);
    let overrides = [
        (&mut patch.title, &args.title),
        (&mut patch.price, &args.price),
        (&mut patch.description, &args.description),
        (&mut patch.image_url, &args.image_url),
        (&mut patch.location, &args.location),
        (&mut patch.contact, &args.contact),
    ];
    for (field, value) in overrides {
        if let Some(value) = value {
            field.clone_from(value);
        }
    }

    market.listings().update(&owner, &listing, &patch).await?;
    println!("Annonce modifiée : {listing}");
    Ok(())
}

/// Delete one of the signed-in user's listings.
///
/// # Errors
///
/// Returns an error if the listing is missing or owned by someone else.
pub async fn delete(market: &Marketplace, args: &DeleteArgs) -> Result<(), CliError> {
    let snapshot = sign_in(market, &args.credentials).await?;
    let owner = owner_or_self(args.owner.as_deref(), snapshot.auth.principal())?;
    let listing = ListingId::parse(&args.listing)?;

    market.listings().delete(&owner, &listing).await?;
    println!("Annonce supprimée : {listing}");
    Ok(())
}

fn owner_or_self(
    owner: Option<&str>,
    principal: Option<&PrincipalId>,
) -> Result<PrincipalId, CliError> {
    match (owner, principal) {
        (Some(raw), _) => Ok(PrincipalId::parse(raw)?),
        (None, Some(principal)) => Ok(principal.clone()),
        (None, None) => Err(MarketError::NotAuthenticated(AuthPrompt::default()).into()),
    }
}
