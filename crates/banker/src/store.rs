//! The mapping from account keys to shadow accounts.

use std::collections::HashMap;
use std::sync::RwLock;

use api_types::{Account, AccountKey, CurrencyPool};

use crate::{BankerError, ResultBanker, ShadowAccount};

type NewAccountHook = Box<dyn Fn(&AccountKey) + Send + Sync>;

/// Concurrent store of shadow accounts.
///
/// `create_account_atomic` is the single linearization point for a key's
/// existence: it returns true exactly once across all callers, and the
/// winner owns first-time initialization.
#[derive(Default)]
pub struct ShadowAccountStore {
    accounts: RwLock<HashMap<AccountKey, ShadowAccount>>,
    on_new_account: RwLock<Option<NewAccountHook>>,
}

impl ShadowAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hook fired when a key first enters the store.
    ///
    /// The hook runs **while the store's write lock is held**: it must not
    /// block or re-enter the store, only hand the key off (e.g. push it onto
    /// a channel drained elsewhere).
    pub fn set_on_new_account(&self, hook: impl Fn(&AccountKey) + Send + Sync + 'static) {
        *self.write_hook() = Some(Box::new(hook));
    }

    /// Creates the entry for `key` if it does not exist yet.
    ///
    /// Returns true for exactly one caller over the lifetime of `key`;
    /// subsequent calls return false and leave the entry untouched.
    pub fn create_account_atomic(&self, key: &AccountKey) -> bool {
        let mut accounts = self.write_accounts();
        if accounts.contains_key(key) {
            return false;
        }
        accounts.insert(key.clone(), ShadowAccount::default());
        if let Some(hook) = self.read_hook().as_ref() {
            hook(key);
        }
        true
    }

    #[must_use]
    pub fn account(&self, key: &AccountKey) -> Option<ShadowAccount> {
        self.read_accounts().get(key).cloned()
    }

    #[must_use]
    pub fn account_keys(&self) -> Vec<AccountKey> {
        self.read_accounts().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_initialized(&self, key: &AccountKey) -> bool {
        self.read_accounts()
            .get(key)
            .is_some_and(|shadow| shadow.initialized)
    }

    /// Keys that have completed their first master exchange and take part in
    /// the periodic sync set.
    #[must_use]
    pub fn initialized_keys(&self) -> Vec<AccountKey> {
        self.read_accounts()
            .iter()
            .filter(|(_, shadow)| shadow.initialized)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// First-time merge, applied by the winner of `create_account_atomic`.
    /// Idempotent: applying the same snapshot twice equals applying it once.
    pub fn initialize_and_merge_state(
        &self,
        key: &AccountKey,
        master: &Account,
    ) -> ResultBanker<ShadowAccount> {
        let mut accounts = self.write_accounts();
        let shadow = accounts
            .get_mut(key)
            .ok_or_else(|| BankerError::UnknownAccount(key.to_string()))?;
        shadow
            .merge_master(master)
            .map_err(|reason| BankerError::MergeInvariant(format!("{key}: {reason}")))?;
        shadow.initialized = true;
        Ok(shadow.clone())
    }

    /// Merges a fresh master snapshot into the shadow. On a rejected
    /// snapshot the account remains in its previous state.
    pub fn sync_from_master(
        &self,
        key: &AccountKey,
        master: &Account,
    ) -> ResultBanker<ShadowAccount> {
        let mut accounts = self.write_accounts();
        let shadow = accounts
            .get_mut(key)
            .ok_or_else(|| BankerError::UnknownAccount(key.to_string()))?;
        shadow
            .merge_master(master)
            .map_err(|reason| BankerError::MergeInvariant(format!("{key}: {reason}")))?;
        Ok(shadow.clone())
    }

    /// Records local spend intent against `key`, creating the shadow account
    /// on a worker's first intent to spend (which fires the new-account
    /// hook). Fails when the commit would drive `available` negative, which
    /// is always the case for a freshly created, not yet authorized account.
    pub fn commit_spend(&self, key: &AccountKey, amount: &CurrencyPool) -> ResultBanker<()> {
        if !self.read_accounts().contains_key(key) {
            self.create_account_atomic(key);
        }
        let mut accounts = self.write_accounts();
        let shadow = accounts
            .get_mut(key)
            .ok_or_else(|| BankerError::UnknownAccount(key.to_string()))?;
        if !shadow.try_commit(amount) {
            return Err(BankerError::InsufficientFunds(key.to_string()));
        }
        Ok(())
    }

    /// Iterates the initialized accounts under the store's read lock; `f`
    /// must not call back into mutating store methods.
    pub fn for_each_initialized_account(&self, mut f: impl FnMut(&AccountKey, &ShadowAccount)) {
        for (key, shadow) in self.read_accounts().iter() {
            if shadow.initialized {
                f(key, shadow);
            }
        }
    }

    fn read_accounts(&self) -> std::sync::RwLockReadGuard<'_, HashMap<AccountKey, ShadowAccount>> {
        self.accounts.read().expect("shadow account store poisoned")
    }

    fn write_accounts(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<AccountKey, ShadowAccount>> {
        self.accounts.write().expect("shadow account store poisoned")
    }

    fn read_hook(&self) -> std::sync::RwLockReadGuard<'_, Option<NewAccountHook>> {
        self.on_new_account.read().expect("new account hook poisoned")
    }

    fn write_hook(&self) -> std::sync::RwLockWriteGuard<'_, Option<NewAccountHook>> {
        self.on_new_account.write().expect("new account hook poisoned")
    }
}
