//! The slave banker: periodic reconciliation of shadow accounts against the
//! master bank.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use api_types::{Account, AccountKey, Amount, Currency, CurrencyPool, MonitorIndicator};

use crate::application::ApplicationLayer;
use crate::error::BankerError;
use crate::shadow::ShadowAccount;
use crate::store::ShadowAccountStore;
use crate::ResultBanker;

/// Budget slice requested per reauthorize cycle when none is configured:
/// 0.10 USD.
pub const DEFAULT_SPEND_RATE: Amount = Amount::new(Currency::Usd, 100_000);

/// Both periodic loops must have succeeded within this window for the banker
/// to report healthy.
pub const MAX_FAIL_SYNC: Duration = Duration::from_secs(3);

/// Cadence of the report-spend and reauthorize loops.
pub const SYNC_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct SlaveBankerConfig {
    /// Identifies this instance within the master's namespace; appended to
    /// every shadow account name so slaves sharing a cluster never collide.
    pub account_suffix: String,
    /// Budget slice requested per reauthorize cycle.
    pub spend_rate: CurrencyPool,
    /// Liveness threshold.
    pub max_fail_sync: Duration,
    pub report_spend_period: Duration,
    pub reauthorize_period: Duration,
}

impl SlaveBankerConfig {
    pub fn new(account_suffix: impl Into<String>, spend_rate: CurrencyPool) -> Self {
        Self {
            account_suffix: account_suffix.into(),
            spend_rate,
            max_fail_sync: MAX_FAIL_SYNC,
            report_spend_period: SYNC_PERIOD,
            reauthorize_period: SYNC_PERIOD,
        }
    }

    fn validate(&self) -> ResultBanker<()> {
        if self.account_suffix.is_empty() {
            return Err(BankerError::Config(
                "account_suffix cannot be empty".to_string(),
            ));
        }
        if self.spend_rate.is_zero() {
            return Err(BankerError::Config("spend_rate cannot be zero".to_string()));
        }
        if self.max_fail_sync.is_zero() {
            return Err(BankerError::Config(
                "max_fail_sync cannot be zero".to_string(),
            ));
        }
        if self.report_spend_period.is_zero() || self.reauthorize_period.is_zero() {
            return Err(BankerError::Config(
                "sync periods cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Last-success timestamps, read by the liveness indicator from a monitor
/// thread; everything in here is published under one lock.
#[derive(Debug)]
struct SyncClock {
    last_sync: Instant,
    last_reauthorize: Instant,
    last_reauthorize_delay: Option<Duration>,
}

struct Inner {
    config: SlaveBankerConfig,
    layer: Arc<dyn ApplicationLayer>,
    accounts: ShadowAccountStore,
    clock: Mutex<SyncClock>,
    reauthorizing: AtomicBool,
    reauthorize_failed: AtomicBool,
    accounts_left: AtomicUsize,
    num_reauthorized: AtomicU64,
    report_in_flight: AtomicBool,
    created_accounts: Mutex<Option<mpsc::UnboundedReceiver<AccountKey>>>,
}

/// The reconciliation engine.
///
/// Workers mutate shadow accounts through [`commit_spend`]; two 1 Hz loops
/// driven by [`run`] report observed spend back to the master and top every
/// initialized account up by the configured spend rate. New accounts cross
/// the store's lock boundary through an internal queue before their
/// first-time initialization round-trip.
///
/// Cloning is cheap and shares all state; the per-account continuations of
/// an in-flight pass each hold a clone, so a pass outlives the call that
/// started it.
///
/// [`commit_spend`]: SlaveBanker::commit_spend
/// [`run`]: SlaveBanker::run
#[derive(Clone)]
pub struct SlaveBanker {
    inner: Arc<Inner>,
}

impl SlaveBanker {
    /// Builds the banker. Empty suffix, zero spend rate, and zero periods
    /// are fatal configuration errors.
    pub fn new(config: SlaveBankerConfig, layer: Arc<dyn ApplicationLayer>) -> ResultBanker<Self> {
        config.validate()?;

        let accounts = ShadowAccountStore::new();
        let (created_tx, created_rx) = mpsc::unbounded_channel();
        // The hook fires while the store's lock is held, so it cannot do the
        // initialization round-trip itself; it only hands the key to the
        // loop-side consumer in `run`.
        accounts.set_on_new_account(move |key: &AccountKey| {
            let _ = created_tx.send(key.clone());
        });

        let now = Instant::now();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                layer,
                accounts,
                clock: Mutex::new(SyncClock {
                    last_sync: now,
                    last_reauthorize: now,
                    last_reauthorize_delay: None,
                }),
                reauthorizing: AtomicBool::new(false),
                reauthorize_failed: AtomicBool::new(false),
                accounts_left: AtomicUsize::new(0),
                num_reauthorized: AtomicU64::new(0),
                report_in_flight: AtomicBool::new(false),
                created_accounts: Mutex::new(Some(created_rx)),
            }),
        })
    }

    /// The name this account is registered under on the master:
    /// `<account path>:<account_suffix>`.
    #[must_use]
    pub fn shadow_account_name(&self, key: &AccountKey) -> String {
        format!("{key}:{}", self.inner.config.account_suffix)
    }

    #[must_use]
    pub fn account(&self, key: &AccountKey) -> Option<ShadowAccount> {
        self.inner.accounts.account(key)
    }

    #[must_use]
    pub fn is_initialized(&self, key: &AccountKey) -> bool {
        self.inner.accounts.is_initialized(key)
    }

    /// Records a worker's spend intent. The first intent against an unknown
    /// key creates the shadow account and queues its initialization.
    pub fn commit_spend(&self, key: &AccountKey, amount: &CurrencyPool) -> ResultBanker<()> {
        self.inner.accounts.commit_spend(key, amount)
    }

    /// Ensures `key` exists locally and on the master.
    ///
    /// Exactly one caller wins `create_account_atomic` and performs the
    /// master-side registration; racing callers get the existing shadow back
    /// immediately, possibly before the winner's round-trip completes.
    pub async fn add_spend_account(&self, key: &AccountKey) -> ResultBanker<ShadowAccount> {
        if !self.inner.accounts.create_account_atomic(key) {
            return self
                .inner
                .accounts
                .account(key)
                .ok_or_else(|| BankerError::UnknownAccount(key.to_string()));
        }

        let master = self
            .inner
            .layer
            .add_spend_account(&self.shadow_account_name(key))
            .await?;
        self.inner.accounts.initialize_and_merge_state(key, &master)
    }

    /// One sync round-trip for a single account: report the local view,
    /// merge the returned master snapshot.
    pub async fn sync_account(&self, key: &AccountKey) -> ResultBanker<ShadowAccount> {
        let shadow = self
            .inner
            .accounts
            .account(key)
            .ok_or_else(|| BankerError::UnknownAccount(key.to_string()))?;
        let master = self
            .inner
            .layer
            .sync_account(&shadow.local_view(), &self.shadow_account_name(key))
            .await?;
        self.inner.accounts.sync_from_master(key, &master)
    }

    /// Syncs every initialized account, one round-trip per key in parallel
    /// with respect to the transport.
    ///
    /// Completes once after all round-trips have: the first failure is
    /// returned, remaining failures are logged as warnings, and `last_sync`
    /// advances only when every account succeeded. An empty initialized set
    /// still advances `last_sync` and completes immediately.
    pub async fn sync_all(&self) -> ResultBanker<()> {
        let keys = self.inner.accounts.initialized_keys();
        if keys.is_empty() {
            self.clock().last_sync = Instant::now();
            return Ok(());
        }

        let mut round_trips = JoinSet::new();
        for key in keys {
            let this = self.clone();
            round_trips.spawn(async move {
                let result = this.sync_account(&key).await;
                (key, result)
            });
        }

        let mut first_failure = None;
        while let Some(joined) = round_trips.join_next().await {
            let failure = match joined {
                Ok((_, Ok(_))) => None,
                Ok((key, Err(err))) => {
                    tracing::warn!("sync failed for {key}: {err}");
                    Some(err)
                }
                Err(err) => {
                    tracing::warn!("sync task failed: {err}");
                    Some(BankerError::Task(err.to_string()))
                }
            };
            if let Some(err) = failure {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                self.clock().last_sync = Instant::now();
                Ok(())
            }
        }
    }

    /// Report-spend tick. Overlap with a previous pass is tolerated: each
    /// pass eventually completes, serial execution is not guaranteed.
    pub fn report_spend(&self, periods_elapsed: u64) {
        if periods_elapsed > 1 {
            tracing::warn!("report-spend loop missed {periods_elapsed} periods");
        }
        if self.inner.report_in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("previous report-spend pass still in progress");
        }

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.sync_all().await {
                tracing::warn!("report-spend sync failed: {err}");
            }
            this.inner.report_in_flight.store(false, Ordering::SeqCst);
        });
    }

    /// Reauthorize tick: posts the configured spend rate against every
    /// initialized account and merges the returned snapshots.
    ///
    /// Passes never overlap: a tick that fires while one is in flight is
    /// skipped with a warning. With no initialized accounts the pass is a
    /// no-op that still refreshes `last_reauthorize`, so liveness rests
    /// solely on the sync loop.
    pub fn reauthorize_budget(&self, periods_elapsed: u64) {
        if periods_elapsed > 1 {
            tracing::warn!("reauthorize loop missed {periods_elapsed} periods");
        }
        if self.inner.reauthorizing.load(Ordering::SeqCst) {
            tracing::warn!("previous reauthorize pass still in progress, skipping tick");
            return;
        }

        let keys = self.inner.accounts.initialized_keys();
        if keys.is_empty() {
            self.clock().last_reauthorize = Instant::now();
            return;
        }

        self.inner.accounts_left.store(keys.len(), Ordering::SeqCst);
        self.inner.reauthorize_failed.store(false, Ordering::SeqCst);
        self.inner.reauthorizing.store(true, Ordering::SeqCst);
        let pass_start = Instant::now();

        for key in keys {
            let this = self.clone();
            tokio::spawn(async move {
                this.reauthorize_account(key, pass_start).await;
            });
        }
    }

    async fn reauthorize_account(&self, key: AccountKey, pass_start: Instant) {
        let path = format!("/v1/accounts/{}/balance", self.shadow_account_name(&key));
        let body = serde_json::to_string(&self.inner.config.spend_rate).unwrap_or_default();

        let mut ok = false;
        let result = self
            .inner
            .layer
            .request("POST", &path, &[("accountType", "spend".to_string())], body)
            .await;
        match result {
            Ok((status, payload)) if (200..300).contains(&status) => {
                match serde_json::from_str::<Account>(&payload) {
                    Ok(master) => match self.inner.accounts.sync_from_master(&key, &master) {
                        Ok(_) => ok = true,
                        Err(err) => {
                            tracing::error!("reauthorize merge failed for {key}: {err}");
                        }
                    },
                    Err(err) => {
                        tracing::warn!("reauthorize response for {key} failed to decode: {err}");
                    }
                }
            }
            Ok((status, payload)) => {
                tracing::warn!("reauthorize for {key} returned {status}: {payload}");
            }
            Err(err) => {
                tracing::warn!("reauthorize for {key} failed: {err}");
            }
        }

        self.finish_reauthorize_response(pass_start, ok);
    }

    /// Bookkeeping shared by every per-account response handler; the last
    /// one closes the pass.
    fn finish_reauthorize_response(&self, pass_start: Instant, ok: bool) {
        if !ok {
            self.inner.reauthorize_failed.store(true, Ordering::SeqCst);
        }
        if self.inner.accounts_left.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }

        let failed = self.inner.reauthorize_failed.swap(false, Ordering::SeqCst);
        {
            let mut clock = self.clock();
            if !failed {
                clock.last_reauthorize = Instant::now();
            }
            clock.last_reauthorize_delay = Some(pass_start.elapsed());
        }
        self.inner.num_reauthorized.fetch_add(1, Ordering::SeqCst);
        // The timestamp is published before the flag clears, so an observer
        // never sees a completed pass with a stale timestamp.
        self.inner.reauthorizing.store(false, Ordering::SeqCst);
    }

    /// Bounded-sleep poll until no reauthorize pass is in flight. A shutdown
    /// and test helper, not a fast-path synchronization primitive.
    pub async fn wait_reauthorized(&self) {
        while self.inner.reauthorizing.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// The freshness signal an external health monitor consumes: healthy iff
    /// both loops succeeded within the configured window.
    #[must_use]
    pub fn provider_indicators(&self) -> MonitorIndicator {
        let now = Instant::now();
        let clock = self.clock();
        let sync_ok = now.duration_since(clock.last_sync) < self.inner.config.max_fail_sync
            && now.duration_since(clock.last_reauthorize) < self.inner.config.max_fail_sync;

        MonitorIndicator {
            service_name: self.inner.config.account_suffix.clone(),
            status: sync_ok,
            message: format!(
                "sync with master bank: {}",
                if sync_ok { "OK" } else { "ERROR" }
            ),
        }
    }

    #[must_use]
    pub fn is_reauthorizing(&self) -> bool {
        self.inner.reauthorizing.load(Ordering::SeqCst)
    }

    /// Completed reauthorize passes since construction.
    #[must_use]
    pub fn num_reauthorized(&self) -> u64 {
        self.inner.num_reauthorized.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_sync(&self) -> Instant {
        self.clock().last_sync
    }

    #[must_use]
    pub fn last_reauthorize(&self) -> Instant {
        self.clock().last_reauthorize
    }

    /// Duration of the most recently completed reauthorize pass.
    #[must_use]
    pub fn last_reauthorize_delay(&self) -> Option<Duration> {
        self.clock().last_reauthorize_delay
    }

    /// Drives the banker: the created-accounts consumer and the two 1 Hz
    /// timer loops. Runs until the surrounding task is dropped.
    pub async fn run(&self) {
        let mut tasks = JoinSet::new();

        let created = self
            .inner
            .created_accounts
            .lock()
            .expect("created accounts queue poisoned")
            .take();
        if let Some(mut created) = created {
            let this = self.clone();
            tasks.spawn(async move {
                // Drained outside the store's lock; doing the round-trip here
                // is what keeps the new-account hook non-blocking.
                while let Some(key) = created.recv().await {
                    if let Err(err) = this.add_spend_account(&key).await {
                        tracing::warn!("first-time initialization failed for {key}: {err}");
                    }
                }
            });
        }

        let this = self.clone();
        tasks.spawn(async move {
            let period = this.inner.config.report_spend_period;
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            let mut last = Instant::now();
            loop {
                ticks.tick().await;
                let periods = periods_elapsed(last.elapsed(), period);
                last = Instant::now();
                this.report_spend(periods);
            }
        });

        let this = self.clone();
        tasks.spawn(async move {
            let period = this.inner.config.reauthorize_period;
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            let mut last = Instant::now();
            loop {
                ticks.tick().await;
                let periods = periods_elapsed(last.elapsed(), period);
                last = Instant::now();
                this.reauthorize_budget(periods);
            }
        });

        while tasks.join_next().await.is_some() {}
    }

    fn clock(&self) -> MutexGuard<'_, SyncClock> {
        self.inner.clock.lock().expect("sync clock poisoned")
    }
}

fn periods_elapsed(elapsed: Duration, period: Duration) -> u64 {
    let periods = (elapsed.as_secs_f64() / period.as_secs_f64()).round() as u64;
    periods.max(1)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use crate::application::BusLayer;

    fn usd(micros: i64) -> CurrencyPool {
        CurrencyPool::from(Amount::new(Currency::Usd, micros))
    }

    fn layer() -> Arc<BusLayer> {
        let (layer, _endpoint) = BusLayer::channel();
        Arc::new(layer)
    }

    #[test]
    fn construction_rejects_empty_suffix() {
        let config = SlaveBankerConfig::new("", usd(100_000));
        assert!(matches!(
            SlaveBanker::new(config, layer()),
            Err(BankerError::Config(_))
        ));
    }

    #[test]
    fn construction_rejects_zero_spend_rate() {
        let config = SlaveBankerConfig::new("r1", CurrencyPool::new());
        assert!(matches!(
            SlaveBanker::new(config, layer()),
            Err(BankerError::Config(_))
        ));
    }

    #[test]
    fn construction_rejects_zero_liveness_threshold() {
        let mut config = SlaveBankerConfig::new("r1", usd(100_000));
        config.max_fail_sync = Duration::ZERO;
        assert!(matches!(
            SlaveBanker::new(config, layer()),
            Err(BankerError::Config(_))
        ));
    }

    #[test]
    fn shadow_names_carry_the_suffix() {
        let config = SlaveBankerConfig::new("r1", usd(100_000));
        let banker = SlaveBanker::new(config, layer()).unwrap();
        let key: AccountKey = "campaign:strategy".parse().unwrap();
        assert_eq!(banker.shadow_account_name(&key), "campaign:strategy:r1");
    }

    #[test]
    fn default_spend_rate_is_ten_cents() {
        assert_eq!(DEFAULT_SPEND_RATE, Amount::new(Currency::Usd, 100_000));
        assert_eq!(MAX_FAIL_SYNC, Duration::from_secs(3));
    }

    #[test]
    fn periods_round_to_at_least_one() {
        let period = Duration::from_secs(1);
        assert_eq!(periods_elapsed(Duration::from_millis(990), period), 1);
        assert_eq!(periods_elapsed(Duration::from_millis(2050), period), 2);
        assert_eq!(periods_elapsed(Duration::from_millis(10), period), 1);
    }
}
