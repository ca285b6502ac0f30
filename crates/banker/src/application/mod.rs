//! The abstract transport to the master bank.
//!
//! The reconciliation core talks to the master through [`ApplicationLayer`],
//! held as an `Arc<dyn ApplicationLayer>`. The high-level operations are all
//! expressed over one required method, [`ApplicationLayer::request`], so a
//! transport only has to move HTTP-shaped requests; [`HttpLayer`] does that
//! with plain HTTP and [`BusLayer`] over an in-process message bus.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use api_types::{Account, AccountKey, AccountSummary, AccountType, CurrencyPool};

pub use bus::{BusLayer, BusRequest, BusResponse};
pub use http::HttpLayer;

mod bus;
mod http;

/// Transport failures surfaced to per-operation callers.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("network error: {0}")]
    Network(String),
    #[error("master returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bus endpoint closed")]
    Closed,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn failure(status: u16, body: String) -> LayerError {
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => err.error,
        Err(_) if body.is_empty() => "master error".to_string(),
        Err(_) => body,
    };
    LayerError::Server { status, message }
}

fn expect_ok(status: u16, body: String) -> Result<(), LayerError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(failure(status, body))
    }
}

fn decode<T: DeserializeOwned>(status: u16, body: String) -> Result<T, LayerError> {
    if (200..300).contains(&status) {
        Ok(serde_json::from_str(&body)?)
    } else {
        Err(failure(status, body))
    }
}

/// Polymorphic transport exposing the master-bank operations the
/// reconciliation core consumes.
///
/// Implementations must be safe to call from a single-threaded loop; the
/// core never depends on parallel dispatch within one operation.
#[async_trait]
pub trait ApplicationLayer: Send + Sync {
    /// Sends one HTTP-shaped request to the master and returns the raw
    /// status code and response body.
    async fn request(
        &self,
        verb: &str,
        path: &str,
        query: &[(&str, String)],
        body: String,
    ) -> Result<(u16, String), LayerError>;

    /// Creates a budget account on the master.
    async fn add_account(&self, key: &AccountKey) -> Result<(), LayerError> {
        let (status, body) = self
            .request(
                "POST",
                "/v1/accounts",
                &[
                    ("accountName", key.to_string()),
                    ("accountType", AccountType::Budget.as_str().to_string()),
                ],
                String::new(),
            )
            .await?;
        expect_ok(status, body)
    }

    /// Transfers `amount` into the account's balance.
    async fn topup_transfer(
        &self,
        key: &AccountKey,
        account_type: AccountType,
        amount: &CurrencyPool,
    ) -> Result<(), LayerError> {
        let (status, body) = self
            .request(
                "POST",
                &format!("/v1/accounts/{key}/balance"),
                &[("accountType", account_type.as_str().to_string())],
                serde_json::to_string(amount)?,
            )
            .await?;
        expect_ok(status, body)
    }

    /// Sets the absolute budget of a top-level account.
    async fn set_budget(&self, top_level: &str, amount: &CurrencyPool) -> Result<(), LayerError> {
        let (status, body) = self
            .request(
                "POST",
                &format!("/v1/accounts/{top_level}/budget"),
                &[],
                serde_json::to_string(amount)?,
            )
            .await?;
        expect_ok(status, body)
    }

    async fn get_account_summary(
        &self,
        key: &AccountKey,
        depth: usize,
    ) -> Result<AccountSummary, LayerError> {
        let (status, body) = self
            .request(
                "GET",
                &format!("/v1/accounts/{key}/summary"),
                &[("depth", depth.to_string())],
                String::new(),
            )
            .await?;
        decode(status, body)
    }

    async fn get_account(&self, key: &AccountKey) -> Result<Account, LayerError> {
        let (status, body) = self
            .request("GET", &format!("/v1/accounts/{key}"), &[], String::new())
            .await?;
        decode(status, body)
    }

    /// Registers a spend account under its mangled shadow name and returns
    /// its initial snapshot.
    async fn add_spend_account(&self, shadow_name: &str) -> Result<Account, LayerError> {
        let (status, body) = self
            .request(
                "POST",
                &format!("/v1/accounts/{shadow_name}/shadow"),
                &[],
                String::new(),
            )
            .await?;
        decode(status, body)
    }

    /// One sync round-trip: sends the current local view, returns the
    /// authoritative master snapshot.
    async fn sync_account(&self, local: &Account, shadow_name: &str) -> Result<Account, LayerError> {
        let (status, body) = self
            .request(
                "POST",
                &format!("/v1/accounts/{shadow_name}"),
                &[],
                serde_json::to_string(local)?,
            )
            .await?;
        decode(status, body)
    }
}
