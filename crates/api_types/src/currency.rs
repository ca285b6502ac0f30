use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Number of micro-units per major currency unit.
///
/// One micro-unit is 1/10000 of a cent, which keeps per-impression prices
/// exact: a CPM of `100000USD/1M` is 0.10 USD.
pub const MICROS_PER_MAJOR: i64 = 1_000_000;

/// ISO-like currency code.
///
/// Monetary values are stored as an `i64` number of **micro-units** (see
/// [`MICROS_PER_MAJOR`]), never as floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
}

impl Currency {
    /// Canonical currency code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<&str> for Currency {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(ParseError::UnknownCurrency(other.to_string())),
        }
    }
}

/// A single typed money value: a currency plus an exact micro-unit count.
///
/// # Examples
///
/// ```rust
/// use api_types::{Amount, Currency};
///
/// let slice: Amount = "100000USD/1M".parse().unwrap();
/// assert_eq!(slice, Amount::new(Currency::Usd, 100_000));
///
/// let same: Amount = "0.10USD".parse().unwrap();
/// assert_eq!(slice, same);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Amount {
    pub currency: Currency,
    pub micros: i64,
}

impl Amount {
    #[must_use]
    pub const fn new(currency: Currency, micros: i64) -> Self {
        Self { currency, micros }
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.micros == 0
    }

    /// Parses `<value><CODE>` (decimal major units, at most 6 fraction
    /// digits, optional leading `+`/`-`) or `<value><CODE>/1M` (integer
    /// micro-units).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidAmount(input.to_string());
        let overflow = || ParseError::InvalidAmount(format!("amount too large: {input}"));

        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (value, code) = trimmed.split_at(split);
        if value.is_empty() {
            return Err(invalid());
        }

        if let Some(code) = code.strip_suffix("/1M") {
            let currency = Currency::try_from(code)?;
            let micros: i64 = value.parse().map_err(|_| invalid())?;
            return Ok(Self { currency, micros });
        }

        let currency = Currency::try_from(code)?;
        let (is_negative, rest) = if let Some(stripped) = value.strip_prefix('-') {
            (true, stripped)
        } else if let Some(stripped) = value.strip_prefix('+') {
            (false, stripped)
        } else {
            (false, value)
        };
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut parts = rest.split('.');
        let major_str = parts.next().ok_or_else(invalid)?;
        let frac_str = parts.next().unwrap_or("");
        if parts.next().is_some() {
            return Err(invalid());
        }
        if major_str.is_empty() || !major_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac_str.len() > 6 {
            return Err(ParseError::InvalidAmount(format!(
                "too many fraction digits: {input}"
            )));
        }

        let major: i64 = major_str.parse().map_err(|_| invalid())?;
        let mut frac = frac_str.to_string();
        while frac.len() < 6 {
            frac.push('0');
        }
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| invalid())?
        };

        let micros = major
            .checked_mul(MICROS_PER_MAJOR)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(overflow)?;
        let micros = if is_negative {
            micros.checked_neg().ok_or_else(overflow)?
        } else {
            micros
        };
        Ok(Self { currency, micros })
    }
}

impl FromStr for Amount {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl fmt::Display for Amount {
    /// Formats as decimal major units plus the code, e.g. `0.10USD`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.micros < 0 { "-" } else { "" };
        let abs = self.micros.unsigned_abs();
        let major = abs / MICROS_PER_MAJOR as u64;
        let frac = abs % MICROS_PER_MAJOR as u64;
        if frac == 0 {
            return write!(f, "{sign}{major}{}", self.currency);
        }
        let frac = format!("{frac:06}");
        write!(f, "{sign}{major}.{}{}", frac.trim_end_matches('0'), self.currency)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parse_micro_unit_form() {
        assert_eq!(
            Amount::parse("100000USD/1M").unwrap(),
            Amount::new(Currency::Usd, 100_000)
        );
        assert_eq!(
            Amount::parse("1EUR/1M").unwrap(),
            Amount::new(Currency::Eur, 1)
        );
    }

    #[test]
    fn parse_major_unit_form() {
        assert_eq!(
            Amount::parse("0.10USD").unwrap(),
            Amount::new(Currency::Usd, 100_000)
        );
        assert_eq!(
            Amount::parse("10USD").unwrap(),
            Amount::new(Currency::Usd, 10_000_000)
        );
        assert_eq!(
            Amount::parse("10.123456EUR").unwrap(),
            Amount::new(Currency::Eur, 10_123_456)
        );
    }

    #[test]
    fn parse_accepts_sign_prefixes() {
        assert_eq!(
            Amount::parse("-0.01USD").unwrap(),
            Amount::new(Currency::Usd, -10_000)
        );
        assert_eq!(
            Amount::parse("+1.00USD").unwrap(),
            Amount::new(Currency::Usd, 1_000_000)
        );
        assert_eq!(
            Amount::parse("-100USD/1M").unwrap(),
            Amount::new(Currency::Usd, -100)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("USD").is_err());
        assert!(Amount::parse("10").is_err());
        assert!(Amount::parse("10XYZ").is_err());
        assert!(Amount::parse("1.2345678USD").is_err());
        assert!(Amount::parse("1.0.0USD").is_err());
        assert!(Amount::parse("-USD").is_err());
        assert!(Amount::parse("+-1USD").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for micros in [1, 100_000, 10_100_000, 42_000_000, -100_000] {
            let amount = Amount::new(Currency::Usd, micros);
            assert_eq!(Amount::parse(&amount.to_string()).unwrap(), amount);
        }
    }
}
