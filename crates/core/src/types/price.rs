//! Type-safe price representation using decimal arithmetic.
//!
//! Listing prices are typed by sellers as free text and stored as strings
//! (the store also holds a few legacy numeric values). [`Price::parse`]
//! accepts both forms and rejects anything that is not a non-negative
//! decimal amount.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when parsing a [`Price`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The input is empty.
    #[error("price cannot be empty")]
    Empty,
    /// The input is not a decimal number.
    #[error("price is not a number: {0}")]
    NotANumber(String),
    /// The amount is negative.
    #[error("price cannot be negative")]
    Negative,
}

/// A listing price in the marketplace currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Parse a seller-entered amount in the default currency.
    ///
    /// Spaces used as thousands separators are ignored and a single comma is
    /// accepted as the decimal separator.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, not a number, or negative.
    pub fn parse(raw: &str) -> Result<Self, PriceError> {
        let cleaned: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.is_empty() {
            return Err(PriceError::Empty);
        }
        let normalized = if cleaned.contains('.') {
            cleaned
        } else {
            cleaned.replacen(',', ".", 1)
        };
        let amount = Decimal::from_str(&normalized)
            .map_err(|_| PriceError::NotANumber(raw.trim().to_owned()))?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative);
        }
        Ok(Self::new(amount.normalize(), CurrencyCode::default()))
    }

    /// Parse a stored price value, which may be a JSON string or number.
    ///
    /// # Errors
    ///
    /// Returns an error for any other JSON type or an unparseable amount.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PriceError> {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => Self::parse(&n.to_string()),
            other => Err(PriceError::NotANumber(other.to_string())),
        }
    }

    /// The amount as stored in the document store (plain decimal string).
    #[must_use]
    pub fn to_store_string(&self) -> String {
        self.amount.to_string()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency_code.code())
    }
}

/// ISO 4217 currency codes accepted by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    /// Haitian gourde.
    #[default]
    HTG,
    USD,
}

impl CurrencyCode {
    /// The ISO 4217 code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::HTG => "HTG",
            Self::USD => "USD",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_amounts() {
        assert_eq!(Price::parse("1500").unwrap().to_store_string(), "1500");
        assert_eq!(Price::parse(" 12.50 ").unwrap().to_store_string(), "12.5");
        assert_eq!(Price::parse("0").unwrap().to_store_string(), "0");
    }

    #[test]
    fn test_parse_local_formats() {
        assert_eq!(Price::parse("1 500").unwrap().to_store_string(), "1500");
        assert_eq!(Price::parse("99,90").unwrap().to_store_string(), "99.9");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Price::parse(""), Err(PriceError::Empty));
        assert!(matches!(Price::parse("cheap"), Err(PriceError::NotANumber(_))));
        assert_eq!(Price::parse("-5"), Err(PriceError::Negative));
    }

    #[test]
    fn test_from_json() {
        let from_str = Price::from_json(&serde_json::json!("250")).unwrap();
        let from_num = Price::from_json(&serde_json::json!(250)).unwrap();
        assert_eq!(from_str, from_num);
        assert!(Price::from_json(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Price::parse("750").unwrap().to_string(), "750 HTG");
    }
}
