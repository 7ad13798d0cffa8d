//! Bizay Marketplace - session, profiles and listings.
//!
//! This crate holds everything the marketplace screens do besides drawing:
//! deciding who the current user is, making sure that user has a profile
//! record, and letting owners manage their listings.
//!
//! # Architecture
//!
//! - [`session`] merges two identity providers (OAuth and email/password)
//!   into one [`session::AuthState`] and shares it through
//!   [`session::SessionContext`]
//! - [`profile`] materializes the `users/{principal}` record exactly once
//! - [`listings`] keeps a live view of one owner's listings and refuses
//!   mutations by anyone but the owner
//! - [`store`] is the document store port, with an in-memory implementation
//!   and a REST/SSE client for the hosted store
//! - [`identity`] holds the identity provider ports and their clients
//!
//! Every store and provider call runs under a deadline ([`deadline`]) and
//! fails with a [`error::MarketError`] carrying a user-facing message.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod deadline;
pub mod error;
pub mod identity;
pub mod listings;
pub mod profile;
pub mod session;
pub mod state;
pub mod store;
pub mod submit;
pub mod telemetry;

pub use config::MarketplaceConfig;
pub use error::{MarketError, Result};
pub use state::Marketplace;
