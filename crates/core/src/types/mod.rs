//! Core types for Bizay.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod initials;
pub mod price;
pub mod provider;

pub use email::{Email, EmailError};
pub use id::*;
pub use initials::Initials;
pub use price::{CurrencyCode, Price, PriceError};
pub use provider::{AuthProvider, OAuthStrategy};
