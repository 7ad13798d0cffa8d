//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types.
//!
//! Identifiers in Bizay are opaque strings issued by an external service
//! (an identity provider for principals, the document store for listings).
//! Because they double as document-store path segments, every ID rejects the
//! characters the store reserves for its own path syntax.

use thiserror::Error;

/// Characters a document-store key may not contain.
pub const RESERVED_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Errors that can occur when parsing an ID.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty (or whitespace only).
    #[error("id cannot be empty")]
    Empty,
    /// The input contains a character reserved by the document store.
    #[error("id cannot contain {0:?}")]
    ReservedCharacter(char),
}

/// Validate a raw identifier string.
///
/// # Errors
///
/// Returns `IdError::Empty` for blank input and `IdError::ReservedCharacter`
/// when the input contains a store-reserved or control character.
pub fn validate_key(raw: &str) -> Result<(), IdError> {
    if raw.trim().is_empty() {
        return Err(IdError::Empty);
    }
    if let Some(c) = raw
        .chars()
        .find(|c| RESERVED_KEY_CHARS.contains(c) || c.is_control())
    {
        return Err(IdError::ReservedCharacter(c));
    }
    Ok(())
}

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(try_from = "String")]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `parse()`, `as_str()`, `into_inner()`
/// - `Display`, `FromStr`, `AsRef<str>` and `TryFrom<String>`
///
/// # Example
///
/// ```rust
/// # use bizay_core::define_id;
/// define_id!(SellerId);
/// define_id!(OrderId);
///
/// let seller = SellerId::parse("u1").unwrap();
/// let order = OrderId::parse("u1").unwrap();
///
/// // These are different types, so this won't compile:
/// // let _: SellerId = order;
/// # let _ = (seller, order);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse an ID from a string.
            ///
            /// # Errors
            ///
            /// Returns an error if the input is blank or contains a
            /// store-reserved character.
            pub fn parse(raw: &str) -> ::core::result::Result<Self, $crate::types::id::IdError> {
                $crate::types::id::validate_key(raw)?;
                Ok(Self(raw.to_owned()))
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return its inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::types::id::IdError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl ::core::convert::TryFrom<String> for $name {
            type Error = $crate::types::id::IdError;

            fn try_from(raw: String) -> ::core::result::Result<Self, Self::Error> {
                $crate::types::id::validate_key(&raw)?;
                Ok(Self(raw))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Define standard entity IDs
define_id!(PrincipalId);
define_id!(ListingId);
