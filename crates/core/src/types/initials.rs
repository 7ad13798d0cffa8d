//! Avatar initials derived from a profile's names.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Uppercase first letters of a first and last name.
///
/// Initials are never edited directly: they are always derived with
/// [`Initials::from_names`] whenever a name is written. A missing name simply
/// contributes nothing, so `("Jean", "")` yields `"J"`.
///
/// ```
/// use bizay_core::Initials;
///
/// assert_eq!(Initials::from_names("Ana", "Joseph").as_str(), "AJ");
/// assert_eq!(Initials::from_names("jean", "").as_str(), "J");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Initials(String);

impl Initials {
    /// Derive initials from a first and last name.
    #[must_use]
    pub fn from_names(first_name: &str, last_name: &str) -> Self {
        let mut initials = String::new();
        for name in [first_name, last_name] {
            if let Some(c) = name.trim().chars().next() {
                initials.extend(c.to_uppercase());
            }
        }
        Self(initials)
    }

    /// Returns the initials as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no name contributed a letter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Initials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
