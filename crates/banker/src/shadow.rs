//! The local replica of a master-side account.

use api_types::{Account, CurrencyPool};

/// A shadow account.
///
/// The slave's local view of one spend account: an authorization ledger
/// mirrored from the master, plus the spend the local workers have committed
/// but not yet reported.
///
/// Per currency, the invariant
/// `net_authorized − committed − acknowledged_spend ≥ 0`
/// holds at every observable moment; [`available`] is exactly that quantity
/// and is what a worker reads when deciding whether it can bid.
///
/// [`available`]: ShadowAccount::available
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShadowAccount {
    /// Authorization deltas applied locally, mirrored from the master.
    pub budget_increases: CurrencyPool,
    pub budget_decreases: CurrencyPool,
    /// Spend committed locally and not yet acknowledged by the master.
    pub committed: CurrencyPool,
    /// Spend the master has acknowledged receiving.
    pub acknowledged_spend: CurrencyPool,
    /// True only after the first successful master exchange.
    pub initialized: bool,
}

impl ShadowAccount {
    /// Net authorized budget.
    #[must_use]
    pub fn net_authorized(&self) -> CurrencyPool {
        &self.budget_increases - &self.budget_decreases
    }

    /// What is left to spend: authorization minus all spend, committed or
    /// acknowledged.
    #[must_use]
    pub fn available(&self) -> CurrencyPool {
        &(&self.net_authorized() - &self.committed) - &self.acknowledged_spend
    }

    /// The view sent to the master on a sync round-trip. `spent` carries the
    /// total spend observed locally so the master can acknowledge it.
    #[must_use]
    pub fn local_view(&self) -> Account {
        Account {
            budget_increases: self.budget_increases.clone(),
            budget_decreases: self.budget_decreases.clone(),
            spent: &self.acknowledged_spend + &self.committed,
            ..Account::default()
        }
    }

    /// Records local spend intent. Returns false (and leaves the account
    /// untouched) when the commit would drive `available` negative.
    pub(crate) fn try_commit(&mut self, amount: &CurrencyPool) -> bool {
        if !(&self.available() - amount).non_negative() {
            return false;
        }
        self.committed += amount;
        true
    }

    /// Three-way merge of local-committed, master-acknowledged and new
    /// authorization deltas.
    ///
    /// Committed spend the master has now acknowledged moves to
    /// `acknowledged_spend` and is cleared locally; the remainder persists
    /// for the next cycle. All checks happen before any mutation, so a
    /// rejected snapshot leaves the shadow in its previous state.
    pub(crate) fn merge_master(&mut self, master: &Account) -> Result<(), String> {
        let master_acked = master.spent.clone();
        let newly_acked = &master_acked - &self.acknowledged_spend;
        if !newly_acked.non_negative() {
            return Err(format!(
                "acknowledged spend went backwards (local {}, master {})",
                self.acknowledged_spend, master_acked
            ));
        }

        // Acknowledged spend we have already cleared can show up again on an
        // overlapping round-trip; clamping keeps the merge commutative.
        let committed_after = (&self.committed - &newly_acked).clamp_non_negative();

        let master_net = master.net_budget();
        let available_after = &(&master_net - &committed_after) - &master_acked;
        if !available_after.non_negative() {
            return Err(format!(
                "authorization below recorded spend (net {master_net}, \
                 committed {committed_after}, acknowledged {master_acked})"
            ));
        }

        self.budget_increases = master.authorized_in();
        self.budget_decreases = master.authorized_out();
        self.acknowledged_spend = master_acked;
        self.committed = committed_after;
        Ok(())
    }
}
