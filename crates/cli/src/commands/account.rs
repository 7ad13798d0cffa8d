//! Account commands.
//!
//! # Usage
//!
//! ```bash
//! bizay signup --first-name Marie --last-name Leroy -e marie@example.ht -p secret1 \
//!     --phone 37001122 --address "Delmas 33"
//! bizay whoami -e marie@example.ht -p secret1
//! ```

#![allow(clippy::print_stdout)]

use clap::Args;
use secrecy::SecretString;
use tracing::info;

use bizay_marketplace::profile::{SignUpForm, UserProfile};
use bizay_marketplace::session::SessionSnapshot;
use bizay_marketplace::{Marketplace, MarketError};

use super::Credentials;

/// Arguments for `bizay signup`.
#[derive(Args)]
pub struct SignupArgs {
    /// First name
    #[arg(long)]
    pub first_name: String,

    /// Last name
    #[arg(long)]
    pub last_name: String,

    /// Account email
    #[arg(short, long)]
    pub email: String,

    /// Password (at least 6 characters)
    #[arg(short, long)]
    pub password: String,

    /// Phone number
    #[arg(long)]
    pub phone: String,

    /// Postal address
    #[arg(long)]
    pub address: String,
}

/// Resolve the session and sign in with `credentials`.
///
/// # Errors
///
/// Returns the marketplace error when resolution or sign-in fails.
pub async fn sign_in(
    market: &Marketplace,
    credentials: &Credentials,
) -> Result<SessionSnapshot, MarketError> {
    let session = market.session();
    let snapshot = session.refresh().await?;
    if snapshot.auth.is_authenticated() {
        return Ok(snapshot);
    }
    session
        .sign_in_with_password(&credentials.email, &credentials.secret())
        .await
}

/// Create a password account.
///
/// # Errors
///
/// Returns an error if the form is incomplete or the account cannot be
/// created.
pub async fn signup(market: &Marketplace, args: SignupArgs) -> Result<(), MarketError> {
    let form = SignUpForm {
        first_name: args.first_name,
        last_name: args.last_name,
        email: args.email,
        password: SecretString::from(args.password),
        phone: args.phone,
        address: args.address,
    };

    let session = market.session();
    session.refresh().await?;
    let snapshot = session.sign_up_with_password(&form).await?;
    info!(principal = ?snapshot.auth.principal(), "account created");

    if let Some(profile) = snapshot.profile {
        println!("Compte créé pour {}", profile.display_name());
        print_profile(&profile);
    }
    Ok(())
}

/// Print the signed-in profile.
///
/// # Errors
///
/// Returns an error if sign-in fails.
pub async fn whoami(market: &Marketplace, credentials: &Credentials) -> Result<(), MarketError> {
    let snapshot = sign_in(market, credentials).await?;
    match snapshot.profile {
        Some(profile) => print_profile(&profile),
        None => println!("Aucun profil chargé."),
    }
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    let provider = profile
        .auth_provider
        .as_ref()
        .map_or_else(|| "inconnu".to_owned(), ToString::to_string);
    println!("  [{}] {}", profile.initials, profile.display_name());
    println!("  Identifiant : {}", profile.principal);
    println!("  Email       : {}", profile.email);
    println!("  Téléphone   : {}", profile.phone);
    println!("  Adresse     : {}", profile.address);
    println!("  Connexion   : {provider}");
}
