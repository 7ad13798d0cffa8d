//! CLI command implementations.

pub mod account;
pub mod browse;
pub mod listings;

use clap::Args;
use secrecy::SecretString;
use thiserror::Error;

use bizay_core::IdError;
use bizay_marketplace::MarketError;
use bizay_marketplace::listings::Listing;
use bizay_marketplace::state::StartupError;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Market(#[from] MarketError),

    /// Backend clients could not be built.
    #[error("Startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Invalid listing id: {0}")]
    InvalidId(#[from] IdError),
}

impl CliError {
    /// Text shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Market(e) => e.user_message(),
            other => other.to_string(),
        }
    }

    /// Log the error; marketplace errors follow their own reporting rules.
    pub fn report(&self) {
        match self {
            Self::Market(e) => e.report(),
            other => tracing::error!(error = %other, "Command failed"),
        }
    }
}

/// Email and password for account-scoped commands.
#[derive(Args)]
pub struct Credentials {
    /// Account email
    #[arg(short, long)]
    pub email: String,

    /// Account password
    #[arg(short, long)]
    pub password: String,
}

impl Credentials {
    pub fn secret(&self) -> SecretString {
        SecretString::from(self.password.clone())
    }
}

/// One listing as a line of text.
pub fn listing_line(listing: &Listing) -> String {
    let price = listing
        .price
        .map_or_else(|| "prix inconnu".to_owned(), |p| p.to_string());
    let date = listing
        .created_at
        .map_or_else(|| "-".to_owned(), |t| t.format("%Y-%m-%d").to_string());
    format!(
        "{id}  {date}  {title}  ({price}, {location})",
        id = listing.id,
        title = listing.title,
        location = listing.location,
    )
}
