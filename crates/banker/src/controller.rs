//! Operator-facing account administration.

use std::sync::Arc;

use api_types::{Account, AccountKey, AccountSummary, AccountType, CurrencyPool};

use crate::application::ApplicationLayer;
use crate::error::BankerError;
use crate::ResultBanker;

/// Thin facade forwarding admin operations to the application layer.
///
/// Failures of the two legacy operations ([`add_budget`],
/// [`account_list`]) are programming errors, not runtime conditions: they
/// fail loudly without contacting the master.
///
/// [`add_budget`]: BudgetController::add_budget
/// [`account_list`]: BudgetController::account_list
pub struct BudgetController {
    layer: Arc<dyn ApplicationLayer>,
}

impl BudgetController {
    pub fn new(layer: Arc<dyn ApplicationLayer>) -> Self {
        Self { layer }
    }

    pub async fn add_account(&self, key: &AccountKey) -> ResultBanker<()> {
        Ok(self.layer.add_account(key).await?)
    }

    /// Transfers budget into an account. Always typed as a budget transfer.
    pub async fn topup_transfer(&self, key: &AccountKey, amount: &CurrencyPool) -> ResultBanker<()> {
        Ok(self
            .layer
            .topup_transfer(key, AccountType::Budget, amount)
            .await?)
    }

    pub async fn set_budget(&self, top_level: &str, amount: &CurrencyPool) -> ResultBanker<()> {
        Ok(self.layer.set_budget(top_level, amount).await?)
    }

    pub async fn summary(&self, key: &AccountKey, depth: usize) -> ResultBanker<AccountSummary> {
        Ok(self.layer.get_account_summary(key, depth).await?)
    }

    pub async fn account(&self, key: &AccountKey) -> ResultBanker<Account> {
        Ok(self.layer.get_account(key).await?)
    }

    /// Superseded by [`topup_transfer`](BudgetController::topup_transfer).
    pub async fn add_budget(
        &self,
        _top_level: &str,
        _amount: &CurrencyPool,
    ) -> ResultBanker<()> {
        Err(BankerError::Unsupported(
            "addBudget is superseded by topupTransfer",
        ))
    }

    /// Superseded by [`summary`](BudgetController::summary): the master now
    /// returns account lists via summaries.
    pub async fn account_list(
        &self,
        _key: &AccountKey,
        _depth: usize,
    ) -> ResultBanker<Vec<AccountKey>> {
        Err(BankerError::Unsupported(
            "getAccountList is superseded by getAccountSummary",
        ))
    }
}
