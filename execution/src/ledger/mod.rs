//! Balance ledger.
//!
//! Balances only move through signed deltas and never drop below zero: a
//! delta larger than the balance leaves exactly 0 behind.

use busride_types::bus::{Account, UserId, MAX_NAME_LENGTH};
use rand::Rng;
use std::future::Future;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::Memory;
pub use sqlite::Sqlite;

/// Attempts at drawing a random unused display name before falling back to the id.
const NAME_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("display name already taken: {0}")]
    NameTaken(String),
    #[error("invalid display name")]
    InvalidName,
    #[error("failed to prepare ledger storage: {0}")]
    Storage(#[from] std::io::Error),
    #[error("ledger database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Per-user balance store.
pub trait Ledger: Send + Sync {
    /// Current balance of `user`, creating the account on first contact.
    fn balance(&self, user: &UserId) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Atomically adds `delta` to the balance of `user`, clamping at zero.
    /// Returns the new balance.
    fn apply_delta(
        &self,
        user: &UserId,
        delta: i64,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;
}

/// Account bookkeeping beyond balances: registration, display names and
/// administrative overwrites.
pub trait AccountStore: Ledger {
    /// Returns the account of `user`, creating it on first contact. The flag is
    /// true when the account was created by this call.
    fn register(&self, user: &UserId) -> Result<(Account, bool), LedgerError>;

    fn account(&self, user: &UserId) -> Result<Option<Account>, LedgerError>;

    /// All accounts, ordered by display name.
    fn accounts(&self) -> Result<Vec<Account>, LedgerError>;

    /// Renames `user`. Names are trimmed, non-empty, bounded and unique.
    fn rename(&self, user: &UserId, name: &str) -> Result<Account, LedgerError>;

    /// Overwrites the balance of an existing account, storing negative values as 0.
    /// Returns `None` for unknown users.
    fn set_balance(&self, user: &UserId, balance: i64) -> Result<Option<Account>, LedgerError>;
}

/// Applies a signed delta to a balance with a floor of zero.
pub fn clamp_delta(balance: u64, delta: i64) -> u64 {
    if delta >= 0 {
        balance.saturating_add(delta as u64)
    } else {
        balance.saturating_sub(delta.unsigned_abs())
    }
}

/// Trims `name` and checks it can be used as a display name.
pub(crate) fn normalize_name(name: &str) -> Result<&str, LedgerError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(LedgerError::InvalidName);
    }
    Ok(name)
}

/// Picks a `UserNNNN` name that `taken` rejects, falling back to one derived from the id.
fn fresh_name(
    user: &UserId,
    mut taken: impl FnMut(&str) -> Result<bool, LedgerError>,
) -> Result<String, LedgerError> {
    let mut rng = rand::thread_rng();
    for _ in 0..NAME_ATTEMPTS {
        let name = format!("User{:04}", rng.gen_range(0..10_000));
        if !taken(&name)? {
            return Ok(name);
        }
    }
    let mut name = format!("User-{user}");
    name.truncate(MAX_NAME_LENGTH);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_delta() {
        assert_eq!(clamp_delta(300, 50), 350);
        assert_eq!(clamp_delta(300, -50), 250);
        assert_eq!(clamp_delta(0, -50), 0);
        assert_eq!(clamp_delta(20, -50), 0);
        assert_eq!(clamp_delta(u64::MAX, 1), u64::MAX);
        assert_eq!(clamp_delta(5, i64::MIN), 0);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Rider ").unwrap(), "Rider");
        assert!(matches!(normalize_name("   "), Err(LedgerError::InvalidName)));
        assert!(matches!(
            normalize_name(&"x".repeat(MAX_NAME_LENGTH + 1)),
            Err(LedgerError::InvalidName)
        ));
    }

    #[test]
    fn test_fresh_name_falls_back_to_id() {
        let user = UserId::from("user_1");
        let name = fresh_name(&user, |_| Ok(false)).unwrap();
        assert!(name.starts_with("User"));
        assert_eq!(name.len(), 8);

        let name = fresh_name(&user, |_| Ok(true)).unwrap();
        assert_eq!(name, "User-user_1");
    }
}
