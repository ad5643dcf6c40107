use super::{clamp_delta, fresh_name, normalize_name, AccountStore, Ledger, LedgerError};
use busride_types::bus::{Account, UserId, STARTING_BALANCE};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, error, info};

/// Ledger held entirely in memory.
///
/// Every mutation happens under one lock, so each delta is a single
/// read-modify-write.
pub struct Memory {
    starting_balance: u64,
    accounts: Mutex<BTreeMap<UserId, Account>>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(STARTING_BALANCE)
    }
}

impl Memory {
    pub fn new(starting_balance: u64) -> Self {
        Self {
            starting_balance,
            accounts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn starting_balance(&self) -> u64 {
        self.starting_balance
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<UserId, Account>>, LedgerError> {
        self.accounts.lock().map_err(|e| {
            error!("Failed to acquire ledger lock: {}", e);
            LedgerError::Unavailable("ledger lock poisoned".to_string())
        })
    }

    fn entry<'a>(
        &self,
        accounts: &'a mut BTreeMap<UserId, Account>,
        user: &UserId,
    ) -> Result<(&'a mut Account, bool), LedgerError> {
        let name = if accounts.contains_key(user) {
            None
        } else {
            Some(fresh_name(user, |name| {
                Ok(accounts.values().any(|a| a.display_name == name))
            })?)
        };
        let created = name.is_some();
        if let Some(name) = &name {
            info!(%user, %name, "created account");
        }
        let account = accounts.entry(user.clone()).or_insert_with(|| {
            Account::new(user.clone(), name.unwrap_or_default(), self.starting_balance)
        });
        Ok((account, created))
    }
}

impl AccountStore for Memory {
    fn register(&self, user: &UserId) -> Result<(Account, bool), LedgerError> {
        let mut accounts = self.lock()?;
        let (account, created) = self.entry(&mut *accounts, user)?;
        Ok((account.clone(), created))
    }

    fn account(&self, user: &UserId) -> Result<Option<Account>, LedgerError> {
        Ok(self.lock()?.get(user).cloned())
    }

    fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let mut accounts: Vec<Account> = self.lock()?.values().cloned().collect();
        accounts.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(accounts)
    }

    fn rename(&self, user: &UserId, name: &str) -> Result<Account, LedgerError> {
        let name = normalize_name(name)?;
        let mut accounts = self.lock()?;
        if accounts
            .values()
            .any(|a| a.display_name == name && &a.id != user)
        {
            return Err(LedgerError::NameTaken(name.to_string()));
        }
        let (account, _) = self.entry(&mut *accounts, user)?;
        account.display_name = name.to_string();
        Ok(account.clone())
    }

    fn set_balance(&self, user: &UserId, balance: i64) -> Result<Option<Account>, LedgerError> {
        let mut accounts = self.lock()?;
        let Some(account) = accounts.get_mut(user) else {
            return Ok(None);
        };
        account.balance = balance.max(0) as u64;
        info!(%user, balance = account.balance, "balance overwritten");
        Ok(Some(account.clone()))
    }
}

impl Ledger for Memory {
    async fn balance(&self, user: &UserId) -> Result<u64, LedgerError> {
        Ok(self.register(user)?.0.balance)
    }

    async fn apply_delta(&self, user: &UserId, delta: i64) -> Result<u64, LedgerError> {
        let mut accounts = self.lock()?;
        let (account, _) = self.entry(&mut *accounts, user)?;
        let previous = account.balance;
        account.balance = clamp_delta(previous, delta);
        debug!(%user, delta, previous, balance = account.balance, "applied delta");
        Ok(account.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busride_types::bus::MAX_NAME_LENGTH;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_contact_creates_account() {
        let ledger = Memory::default();
        let user = UserId::from("user_1");
        assert_eq!(ledger.account(&user).unwrap(), None);
        assert_eq!(ledger.balance(&user).await.unwrap(), STARTING_BALANCE);

        let account = ledger.account(&user).unwrap().unwrap();
        assert!(account.display_name.starts_with("User"));

        let (again, created) = ledger.register(&user).unwrap();
        assert!(!created);
        assert_eq!(again, account);
    }

    #[tokio::test]
    async fn test_delta_floor_is_zero() {
        let ledger = Memory::default();
        let user = UserId::from("user_1");
        ledger.register(&user).unwrap();
        ledger.set_balance(&user, 0).unwrap();

        assert_eq!(ledger.apply_delta(&user, -50).await.unwrap(), 0);
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
        assert_eq!(ledger.apply_delta(&user, 75).await.unwrap(), 75);
        assert_eq!(ledger.apply_delta(&user, -25).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_concurrent_deltas_are_not_lost() {
        let ledger = Arc::new(Memory::new(0));
        let user = UserId::from("user_1");
        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    ledger.apply_delta(&user, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ledger.balance(&user).await.unwrap(), 320);
    }

    #[test]
    fn test_rename_rules() {
        let ledger = Memory::default();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        ledger.register(&alice).unwrap();
        ledger.register(&bob).unwrap();

        let renamed = ledger.rename(&alice, "  Alice ").unwrap();
        assert_eq!(renamed.display_name, "Alice");
        // Renaming to your own name is fine
        ledger.rename(&alice, "Alice").unwrap();

        assert!(matches!(
            ledger.rename(&bob, "Alice"),
            Err(LedgerError::NameTaken(_))
        ));
        assert!(matches!(ledger.rename(&bob, "   "), Err(LedgerError::InvalidName)));
        assert!(matches!(
            ledger.rename(&bob, &"b".repeat(MAX_NAME_LENGTH + 1)),
            Err(LedgerError::InvalidName)
        ));
        assert_ne!(ledger.account(&bob).unwrap().unwrap().display_name, "Alice");
    }

    #[test]
    fn test_accounts_sorted_by_name() {
        let ledger = Memory::default();
        for (id, name) in [("1", "carol"), ("2", "alice"), ("3", "bob")] {
            ledger.rename(&UserId::from(id), name).unwrap();
        }
        let names: Vec<String> = ledger
            .accounts()
            .unwrap()
            .into_iter()
            .map(|a| a.display_name)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_set_balance() {
        let ledger = Memory::default();
        let user = UserId::from("user_1");
        assert_eq!(ledger.set_balance(&user, 10).unwrap(), None);
        ledger.register(&user).unwrap();
        assert_eq!(ledger.set_balance(&user, 999).unwrap().unwrap().balance, 999);
        assert_eq!(ledger.set_balance(&user, -5).unwrap().unwrap().balance, 0);
    }
}
