//! Bizay CLI - the marketplace from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Create an account
//! bizay signup --first-name Marie --last-name Leroy -e marie@example.ht -p secret1 \
//!     --phone 37001122 --address "Delmas 33"
//!
//! # Show the signed-in profile
//! bizay whoami -e marie@example.ht -p secret1
//!
//! # Follow your listings live
//! bizay listings -e marie@example.ht -p secret1 --watch
//!
//! # Browse every listing as a guest
//! bizay browse --search velo --category Sport
//! ```
//!
//! # Commands
//!
//! - `signup` - Create a password account and its profile
//! - `whoami` - Show the current profile
//! - `listings` - List (or `--watch`) your listings
//! - `publish`, `edit`, `delete` - Manage your listings
//! - `browse`, `categories` - Guest catalog
//!
//! Configuration comes from the environment (see `MarketplaceConfig`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use bizay_marketplace::telemetry::{DEFAULT_LOG_FILTER, init_sentry, init_tracing};
use bizay_marketplace::{Marketplace, MarketplaceConfig};

mod commands;

use commands::{CliError, Credentials};

#[derive(Parser)]
#[command(name = "bizay")]
#[command(author, version, about = "Bizay marketplace CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a password account and its profile
    Signup(commands::account::SignupArgs),
    /// Show the signed-in profile
    Whoami {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// List your listings, newest first
    Listings {
        #[command(flatten)]
        credentials: Credentials,

        /// Keep printing the full list after every change (Ctrl-C to stop)
        #[arg(short, long)]
        watch: bool,
    },
    /// Publish a new listing
    Publish(commands::listings::PublishArgs),
    /// Edit one of your listings
    Edit(commands::listings::EditArgs),
    /// Delete one of your listings
    Delete(commands::listings::DeleteArgs),
    /// Browse every listing without signing in
    Browse {
        /// Case-insensitive text to look for
        #[arg(short, long)]
        search: Option<String>,

        /// Only show this category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List categories with their listing counts
    Categories,
}

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Missing configuration is the one fatal error.
    let config = match MarketplaceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing(DEFAULT_LOG_FILTER);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.report();
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: MarketplaceConfig) -> Result<(), CliError> {
    let market = Marketplace::connect(config)?;

    match cli.command {
        Commands::Signup(args) => commands::account::signup(&market, args).await?,
        Commands::Whoami { credentials } => commands::account::whoami(&market, &credentials).await?,
        Commands::Listings { credentials, watch } => {
            commands::listings::mine(&market, &credentials, watch).await?;
        }
        Commands::Publish(args) => commands::listings::publish(&market, &args).await?,
        Commands::Edit(args) => commands::listings::edit(&market, &args).await?,
        Commands::Delete(args) => commands::listings::delete(&market, &args).await?,
        Commands::Browse { search, category } => {
            commands::browse::browse(&market, search.as_deref(), category.as_deref()).await?;
        }
        Commands::Categories => commands::browse::categories(&market).await?,
    }
    Ok(())
}
