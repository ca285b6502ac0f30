use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Amount, Currency, ParseError};

/// A multiset of money values where each currency appears at most once.
///
/// The pool is kept canonical: zero entries are elided, so two pools are
/// equal iff they hold the same non-zero values, and `is_zero` is just
/// emptiness. Serializes as a JSON object mapping currency code to
/// micro-units, e.g. `{"USD": 100000}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CurrencyPool(BTreeMap<Currency, i64>);

impl CurrencyPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Micro-units held for `currency` (zero when absent).
    #[must_use]
    pub fn get(&self, currency: Currency) -> i64 {
        self.0.get(&currency).copied().unwrap_or(0)
    }

    /// Returns true when no entry is negative.
    #[must_use]
    pub fn non_negative(&self) -> bool {
        self.0.values().all(|&v| v >= 0)
    }

    /// Copy of this pool with every negative entry dropped.
    #[must_use]
    pub fn clamp_non_negative(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(_, &v)| v > 0)
                .map(|(&c, &v)| (c, v))
                .collect(),
        )
    }

    pub fn add_micros(&mut self, currency: Currency, micros: i64) {
        let value = self.0.entry(currency).or_insert(0);
        *value += micros;
        if *value == 0 {
            self.0.remove(&currency);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, i64)> + '_ {
        self.0.iter().map(|(&c, &v)| (c, v))
    }

    pub fn currencies(&self) -> impl Iterator<Item = Currency> + '_ {
        self.0.keys().copied()
    }
}

impl From<Amount> for CurrencyPool {
    fn from(amount: Amount) -> Self {
        let mut pool = Self::default();
        pool.add_micros(amount.currency, amount.micros);
        pool
    }
}

impl<'de> Deserialize<'de> for CurrencyPool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Normalize on the way in so zero entries never survive decoding.
        let raw = BTreeMap::<Currency, i64>::deserialize(deserializer)?;
        let mut pool = Self::default();
        for (currency, micros) in raw {
            pool.add_micros(currency, micros);
        }
        Ok(pool)
    }
}

impl AddAssign<&CurrencyPool> for CurrencyPool {
    fn add_assign(&mut self, rhs: &CurrencyPool) {
        for (currency, micros) in rhs.iter() {
            self.add_micros(currency, micros);
        }
    }
}

impl SubAssign<&CurrencyPool> for CurrencyPool {
    fn sub_assign(&mut self, rhs: &CurrencyPool) {
        for (currency, micros) in rhs.iter() {
            self.add_micros(currency, -micros);
        }
    }
}

impl AddAssign<Amount> for CurrencyPool {
    fn add_assign(&mut self, rhs: Amount) {
        self.add_micros(rhs.currency, rhs.micros);
    }
}

impl Add for &CurrencyPool {
    type Output = CurrencyPool;

    fn add(self, rhs: &CurrencyPool) -> CurrencyPool {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub for &CurrencyPool {
    type Output = CurrencyPool;

    fn sub(self, rhs: &CurrencyPool) -> CurrencyPool {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl fmt::Display for CurrencyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut first = true;
        for (currency, micros) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}", Amount::new(currency, micros))?;
        }
        Ok(())
    }
}

impl FromStr for CurrencyPool {
    type Err = ParseError;

    /// Parses a comma-separated list of [`Amount`]s, e.g. `0.10USD, 1EUR`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pool = Self::default();
        for part in s.split(',') {
            pool += Amount::parse(part)?;
        }
        Ok(pool)
    }
}
