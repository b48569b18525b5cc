//! # Price Types
//!
//! Money handling for the storefront. Amounts are always kept in the
//! smallest currency unit (pence for GBP).

use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    GBP,
    USD,
    EUR,
    JPY,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::GBP => "gbp",
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::JPY => "jpy",
        }
    }

    /// Parse a lowercase or uppercase ISO code
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "gbp" => Some(Currency::GBP),
            "usd" => Some(Currency::USD),
            "eur" => Some(Currency::EUR),
            "jpy" => Some(Currency::JPY),
            _ => None,
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, the others have 2)
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Convert a decimal amount to the smallest currency unit
    pub fn to_smallest_unit(&self, amount: f64) -> i64 {
        let multiplier = 10_f64.powi(self.decimal_places() as i32);
        (amount * multiplier).round() as i64
    }

    /// Convert from smallest unit back to decimal
    pub fn from_smallest_unit(&self, amount: i64) -> f64 {
        let divisor = 10_f64.powi(self.decimal_places() as i32);
        amount as f64 / divisor
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Price with amount in smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in smallest currency unit
    pub amount: i64,
    /// Currency
    pub currency: Currency,
}

impl Price {
    /// Create a new price from decimal amount
    pub fn new(amount: f64, currency: Currency) -> Self {
        Self {
            amount: currency.to_smallest_unit(amount),
            currency,
        }
    }

    /// Create a price from smallest unit
    pub fn from_minor(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Get the decimal amount
    pub fn as_decimal(&self) -> f64 {
        self.currency.from_smallest_unit(self.amount)
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Format for display (e.g., "£10.00")
    pub fn display(&self) -> String {
        let symbol = match self.currency {
            Currency::GBP => "£",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::JPY => "¥",
        };
        if self.currency.decimal_places() == 0 {
            format!("{}{}", symbol, self.amount)
        } else {
            format!("{}{:.2}", symbol, self.as_decimal())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_conversion() {
        let gbp = Currency::GBP;
        assert_eq!(gbp.to_smallest_unit(10.99), 1099);
        assert_eq!(gbp.from_smallest_unit(1099), 10.99);

        let jpy = Currency::JPY;
        assert_eq!(jpy.to_smallest_unit(1000.0), 1000);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("GBP"), Some(Currency::GBP));
        assert_eq!(Currency::parse("usd"), Some(Currency::USD));
        assert_eq!(Currency::parse("xyz"), None);
    }

    #[test]
    fn test_price_display() {
        assert_eq!(Price::new(19.99, Currency::GBP).display(), "£19.99");
        assert_eq!(Price::from_minor(500, Currency::JPY).display(), "¥500");
    }
}
