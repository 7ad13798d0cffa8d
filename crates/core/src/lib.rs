//! Bizay Core - Shared domain types.
//!
//! This crate provides the types shared by every Bizay component:
//! - `marketplace` - Session resolution, profiles and listings
//! - `cli` - Command-line driver over the marketplace library
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no store access, no HTTP
//! clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for principal/listing IDs, emails, prices,
//!   provider tags and initials

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
