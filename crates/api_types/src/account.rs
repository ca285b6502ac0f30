use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CurrencyPool, ParseError};

/// Ordered path of name segments identifying an account in the hierarchy,
/// e.g. `campaign:strategy`. Equality and hashing are by full path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey(Vec<String>);

impl AccountKey {
    /// Builds a key from path segments, rejecting empty paths, empty
    /// segments, and segments containing the `:` separator.
    pub fn new<I, S>(segments: I) -> Result<Self, ParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(ParseError::InvalidKey("empty path".to_string()));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(ParseError::InvalidKey("empty segment".to_string()));
            }
            if segment.contains(':') {
                return Err(ParseError::InvalidKey(format!(
                    "segment contains separator: {segment}"
                )));
            }
        }
        Ok(Self(segments))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// First path segment (the top-level account name).
    #[must_use]
    pub fn top_level(&self) -> &str {
        &self.0[0]
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

impl FromStr for AccountKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(':'))
    }
}

impl Serialize for AccountKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Master-side account class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Budget,
    Spend,
}

impl AccountType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AccountType::Budget => "budget",
            AccountType::Spend => "spend",
        }
    }
}

/// Master-side account snapshot, as exchanged on every sync round-trip.
///
/// Authorization is a ledger of in/out pools rather than a single balance so
/// both sides can compute deltas; `spent` is the spend the master has
/// acknowledged for this account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub budget_increases: CurrencyPool,
    pub budget_decreases: CurrencyPool,
    pub recycled_in: CurrencyPool,
    pub recycled_out: CurrencyPool,
    pub adjustments_in: CurrencyPool,
    pub adjustments_out: CurrencyPool,
    pub spent: CurrencyPool,
    pub line_items: BTreeMap<String, CurrencyPool>,
}

impl Account {
    /// Everything that increases this account's authorization.
    #[must_use]
    pub fn authorized_in(&self) -> CurrencyPool {
        &(&self.budget_increases + &self.recycled_in) + &self.adjustments_in
    }

    /// Everything that decreases this account's authorization.
    #[must_use]
    pub fn authorized_out(&self) -> CurrencyPool {
        &(&self.budget_decreases + &self.recycled_out) + &self.adjustments_out
    }

    /// Net authorized budget.
    #[must_use]
    pub fn net_budget(&self) -> CurrencyPool {
        &self.authorized_in() - &self.authorized_out()
    }
}

/// Aggregated view of an account subtree, bounded by the requested depth.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSummary {
    pub budget: CurrencyPool,
    pub spent: CurrencyPool,
    pub adjustments: CurrencyPool,
    pub available: CurrencyPool,
    pub subaccounts: BTreeMap<String, AccountSummary>,
}
