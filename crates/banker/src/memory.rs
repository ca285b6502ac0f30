//! Minimal in-memory master-side ledger.
//!
//! Serves the message-bus transport so the slave is exercisable end to end
//! without a real master: the daemon's development mode and the integration
//! tests both drain a bus endpoint into one of these. It implements just
//! enough of the master protocol for the slave side; it is not a production
//! master.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use api_types::{Account, AccountSummary, CurrencyPool};

use crate::application::{BusRequest, BusResponse};

#[derive(Debug, Default)]
pub struct MemoryMaster {
    accounts: BTreeMap<String, Account>,
}

fn json_ok<T: Serialize>(value: &T) -> BusResponse {
    match serde_json::to_string(value) {
        Ok(body) => BusResponse::ok(body),
        Err(err) => BusResponse::error(500, &format!("encode failed: {err}")),
    }
}

impl MemoryMaster {
    /// Spawns a task draining `endpoint` into a fresh ledger.
    pub fn spawn(mut endpoint: UnboundedReceiver<BusRequest>) -> JoinHandle<()> {
        let mut master = MemoryMaster::default();
        tokio::spawn(async move {
            while let Some(BusRequest {
                verb,
                path,
                query,
                body,
                reply,
            }) = endpoint.recv().await
            {
                let response = master.handle(&verb, &path, &query, &body);
                let _ = reply.send(response);
            }
        })
    }

    /// Routes one HTTP-shaped request against the ledger.
    pub fn handle(
        &mut self,
        verb: &str,
        path: &str,
        query: &[(String, String)],
        body: &str,
    ) -> BusResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        match (verb, segments.as_slice()) {
            ("POST", ["v1", "accounts"]) => match param("accountName") {
                Some(name) => self.create(name),
                None => BusResponse::error(400, "accountName is required"),
            },
            ("POST", ["v1", "accounts", name, "shadow"]) => self.register_shadow(name),
            ("POST", ["v1", "accounts", name, "budget"]) => self.set_budget(name, body),
            ("POST", ["v1", "accounts", name, "balance"]) => match param("accountType") {
                Some("spend") => self.reauthorize(name, body),
                _ => self.topup(name, body),
            },
            ("POST", ["v1", "accounts", name]) => self.sync(name, body),
            ("GET", ["v1", "accounts", name, "summary"]) => {
                let depth = param("depth").and_then(|raw| raw.parse().ok()).unwrap_or(3);
                json_ok(&self.summary_of(name, depth))
            }
            ("GET", ["v1", "accounts", name]) => match self.accounts.get(*name) {
                Some(account) => json_ok(account),
                None => BusResponse::error(404, "account not found"),
            },
            _ => BusResponse::error(404, "no such route"),
        }
    }

    fn create(&mut self, name: &str) -> BusResponse {
        let account = self.accounts.entry(name.to_string()).or_default();
        json_ok(&account.clone())
    }

    fn register_shadow(&mut self, name: &str) -> BusResponse {
        let account = self.accounts.entry(name.to_string()).or_default();
        json_ok(&account.clone())
    }

    fn set_budget(&mut self, name: &str, body: &str) -> BusResponse {
        let amount: CurrencyPool = match serde_json::from_str(body) {
            Ok(amount) => amount,
            Err(err) => return BusResponse::error(400, &format!("invalid body: {err}")),
        };
        let account = self.accounts.entry(name.to_string()).or_default();
        account.budget_increases = amount;
        account.budget_decreases = CurrencyPool::new();
        json_ok(&account.clone())
    }

    fn topup(&mut self, name: &str, body: &str) -> BusResponse {
        let amount: CurrencyPool = match serde_json::from_str(body) {
            Ok(amount) => amount,
            Err(err) => return BusResponse::error(400, &format!("invalid body: {err}")),
        };
        let account = self.accounts.entry(name.to_string()).or_default();
        account.budget_increases += &amount;
        json_ok(&account.clone())
    }

    fn reauthorize(&mut self, name: &str, body: &str) -> BusResponse {
        let slice: CurrencyPool = match serde_json::from_str(body) {
            Ok(slice) => slice,
            Err(err) => return BusResponse::error(400, &format!("invalid body: {err}")),
        };
        let Some(account) = self.accounts.get_mut(name) else {
            return BusResponse::error(404, "account not registered");
        };
        account.budget_increases += &slice;
        json_ok(&account.clone())
    }

    /// Acknowledges reported spend monotonically: a stale re-report never
    /// lowers `spent`.
    fn sync(&mut self, name: &str, body: &str) -> BusResponse {
        let local: Account = match serde_json::from_str(body) {
            Ok(local) => local,
            Err(err) => return BusResponse::error(400, &format!("invalid body: {err}")),
        };
        let Some(account) = self.accounts.get_mut(name) else {
            return BusResponse::error(404, "account not registered");
        };
        for (currency, reported) in local.spent.iter() {
            let known = account.spent.get(currency);
            if reported > known {
                account.spent.add_micros(currency, reported - known);
            }
        }
        json_ok(&account.clone())
    }

    fn summary_of(&self, name: &str, depth: usize) -> AccountSummary {
        let mut summary = AccountSummary::default();
        if let Some(account) = self.accounts.get(name) {
            summary.budget = account.net_budget();
            summary.spent = account.spent.clone();
            summary.available = &summary.budget - &summary.spent;
        }
        if depth == 0 {
            return summary;
        }

        let prefix = format!("{name}:");
        let children: Vec<String> = self
            .accounts
            .keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains(':'))
            })
            .cloned()
            .collect();
        for child in children {
            let child_summary = self.summary_of(&child, depth - 1);
            summary.budget += &child_summary.budget;
            summary.spent += &child_summary.spent;
            summary.available += &child_summary.available;
            let short = child[prefix.len()..].to_string();
            summary.subaccounts.insert(short, child_summary);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use api_types::{Amount, Currency};

    fn usd(micros: i64) -> CurrencyPool {
        CurrencyPool::from(Amount::new(Currency::Usd, micros))
    }

    fn pool_body(pool: &CurrencyPool) -> String {
        serde_json::to_string(pool).unwrap()
    }

    fn account_from(response: BusResponse) -> Account {
        assert_eq!(response.status, 200, "body: {}", response.body);
        serde_json::from_str(&response.body).unwrap()
    }

    #[test]
    fn unknown_route_is_a_404() {
        let mut master = MemoryMaster::default();
        let response = master.handle("DELETE", "/v1/accounts/a", &[], "");
        assert_eq!(response.status, 404);
    }

    #[test]
    fn reauthorize_grants_the_posted_slice() {
        let mut master = MemoryMaster::default();
        master.handle("POST", "/v1/accounts/a:r1/shadow", &[], "");

        let spend = [("accountType".to_string(), "spend".to_string())];
        let account = account_from(master.handle(
            "POST",
            "/v1/accounts/a:r1/balance",
            &spend,
            &pool_body(&usd(100_000)),
        ));
        assert_eq!(account.budget_increases, usd(100_000));
    }

    #[test]
    fn acknowledgment_is_monotone() {
        let mut master = MemoryMaster::default();
        master.handle("POST", "/v1/accounts/a:r1/shadow", &[], "");

        let report = |spent: CurrencyPool| Account {
            spent,
            ..Account::default()
        };
        let first = account_from(master.handle(
            "POST",
            "/v1/accounts/a:r1",
            &[],
            &serde_json::to_string(&report(usd(3_000_000))).unwrap(),
        ));
        assert_eq!(first.spent, usd(3_000_000));

        // A stale re-report of less spend must not lower the ledger.
        let second = account_from(master.handle(
            "POST",
            "/v1/accounts/a:r1",
            &[],
            &serde_json::to_string(&report(usd(1_000_000))).unwrap(),
        ));
        assert_eq!(second.spent, usd(3_000_000));
    }

    #[test]
    fn summary_aggregates_the_subtree() {
        let mut master = MemoryMaster::default();
        master.handle("POST", "/v1/accounts/top:a/shadow", &[], "");
        master.handle("POST", "/v1/accounts/top:b/shadow", &[], "");
        master.handle(
            "POST",
            "/v1/accounts/top:a/balance",
            &[],
            &pool_body(&usd(2_000_000)),
        );
        master.handle(
            "POST",
            "/v1/accounts/top:b/balance",
            &[],
            &pool_body(&usd(1_000_000)),
        );

        let summary = master.summary_of("top", 3);
        assert_eq!(summary.budget, usd(3_000_000));
        assert_eq!(summary.subaccounts.len(), 2);
        assert_eq!(summary.subaccounts["a"].budget, usd(2_000_000));

        let shallow = master.summary_of("top", 0);
        assert!(shallow.subaccounts.is_empty());
    }
}
