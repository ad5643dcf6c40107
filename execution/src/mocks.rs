//! Test doubles for the deck provider and the ledger.

use crate::{
    deck::{DeckError, DeckProvider},
    ledger::{clamp_delta, normalize_name, AccountStore, Ledger, LedgerError},
};
use busride_types::bus::{Account, Card, DeckHandle, Suit, UserId, Value, STARTING_BALANCE};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

/// Shorthand for [Card::new].
pub fn card(value: Value, suit: Suit) -> Card {
    Card::new(value, suit)
}

/// Deck provider that deals a scripted sequence of cards, whatever the handle.
#[derive(Default)]
pub struct ScriptedDecks {
    cards: Mutex<VecDeque<Card>>,
    shuffles: AtomicUsize,
    draws: AtomicUsize,
    fail_shuffles: AtomicBool,
    fail_draws: AtomicBool,
    stall: AtomicBool,
    released: Mutex<Vec<DeckHandle>>,
}

impl ScriptedDecks {
    pub fn new(cards: impl IntoIterator<Item = Card>) -> Self {
        let decks = Self::default();
        decks.push(cards);
        decks
    }

    /// Appends cards to the script.
    pub fn push(&self, cards: impl IntoIterator<Item = Card>) {
        self.cards.lock().unwrap().extend(cards);
    }

    pub fn remaining(&self) -> usize {
        self.cards.lock().unwrap().len()
    }

    pub fn shuffles(&self) -> usize {
        self.shuffles.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }

    /// Handles released so far, in order.
    pub fn released(&self) -> Vec<DeckHandle> {
        self.released.lock().unwrap().clone()
    }

    pub fn fail_shuffles(&self, fail: bool) {
        self.fail_shuffles.store(fail, Ordering::SeqCst);
    }

    pub fn fail_draws(&self, fail: bool) {
        self.fail_draws.store(fail, Ordering::SeqCst);
    }

    /// Makes every call hang until it is timed out.
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

impl DeckProvider for ScriptedDecks {
    async fn new_shuffled_deck(&self) -> Result<DeckHandle, DeckError> {
        self.maybe_stall().await;
        if self.fail_shuffles.load(Ordering::SeqCst) {
            return Err(DeckError::Unavailable("scripted shuffle failure".to_string()));
        }
        let id = self.shuffles.fetch_add(1, Ordering::SeqCst);
        Ok(DeckHandle(format!("scripted-{id}")))
    }

    async fn draw_cards(&self, _: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        self.maybe_stall().await;
        if self.fail_draws.load(Ordering::SeqCst) {
            return Err(DeckError::Unavailable("scripted draw failure".to_string()));
        }
        let mut cards = self.cards.lock().unwrap();
        if cards.len() < count {
            return Err(DeckError::Exhausted {
                requested: count,
                remaining: cards.len(),
            });
        }
        self.draws.fetch_add(1, Ordering::SeqCst);
        Ok(cards.drain(..count).collect())
    }

    fn release(&self, deck: &DeckHandle) {
        self.released.lock().unwrap().push(deck.clone());
    }
}

/// Ledger that records every delta it is asked to apply.
pub struct RecordingLedger {
    starting_balance: u64,
    balances: Mutex<HashMap<UserId, u64>>,
    names: Mutex<HashMap<UserId, String>>,
    deltas: Mutex<Vec<(UserId, i64)>>,
    fail: AtomicBool,
    fail_reads: AtomicBool,
}

impl Default for RecordingLedger {
    fn default() -> Self {
        Self {
            starting_balance: STARTING_BALANCE,
            balances: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
            deltas: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }
}

impl RecordingLedger {
    pub fn with_balance(user: &UserId, balance: u64) -> Self {
        let ledger = Self::default();
        ledger.set(user, balance);
        ledger
    }

    pub fn set(&self, user: &UserId, balance: u64) {
        self.balances.lock().unwrap().insert(user.clone(), balance);
    }

    pub fn balance_of(&self, user: &UserId) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(user)
            .copied()
            .unwrap_or(self.starting_balance)
    }

    /// Deltas applied so far, in order.
    pub fn deltas(&self) -> Vec<(UserId, i64)> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fails balance reads only. Deltas still apply.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn snapshot(&self, user: &UserId) -> Option<Account> {
        let balance = *self.balances.lock().unwrap().get(user)?;
        let name = self
            .names
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_else(|| format!("User-{user}"));
        Some(Account::new(user.clone(), name, balance))
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("scripted ledger failure".to_string()));
        }
        Ok(())
    }
}

impl Ledger for RecordingLedger {
    async fn balance(&self, user: &UserId) -> Result<u64, LedgerError> {
        self.check()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("scripted read failure".to_string()));
        }
        Ok(self.balance_of(user))
    }

    async fn apply_delta(&self, user: &UserId, delta: i64) -> Result<u64, LedgerError> {
        self.check()?;
        let mut balances = self.balances.lock().unwrap();
        let balance = balances
            .entry(user.clone())
            .or_insert(self.starting_balance);
        *balance = clamp_delta(*balance, delta);
        self.deltas.lock().unwrap().push((user.clone(), delta));
        Ok(*balance)
    }
}

impl AccountStore for RecordingLedger {
    fn register(&self, user: &UserId) -> Result<(Account, bool), LedgerError> {
        self.check()?;
        let created = {
            let mut balances = self.balances.lock().unwrap();
            let created = !balances.contains_key(user);
            balances.entry(user.clone()).or_insert(self.starting_balance);
            created
        };
        let account = self
            .snapshot(user)
            .ok_or_else(|| LedgerError::Unavailable("account vanished".to_string()))?;
        Ok((account, created))
    }

    fn account(&self, user: &UserId) -> Result<Option<Account>, LedgerError> {
        self.check()?;
        Ok(self.snapshot(user))
    }

    fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.check()?;
        let users: Vec<UserId> = self.balances.lock().unwrap().keys().cloned().collect();
        let mut accounts: Vec<Account> = users.iter().filter_map(|u| self.snapshot(u)).collect();
        accounts.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(accounts)
    }

    fn rename(&self, user: &UserId, name: &str) -> Result<Account, LedgerError> {
        self.check()?;
        let name = normalize_name(name)?;
        {
            let mut names = self.names.lock().unwrap();
            if names.iter().any(|(id, n)| n == name && id != user) {
                return Err(LedgerError::NameTaken(name.to_string()));
            }
            names.insert(user.clone(), name.to_string());
        }
        Ok(self.register(user)?.0)
    }

    fn set_balance(&self, user: &UserId, balance: i64) -> Result<Option<Account>, LedgerError> {
        self.check()?;
        if self.snapshot(user).is_none() {
            return Ok(None);
        }
        self.set(user, balance.max(0) as u64);
        Ok(self.snapshot(user))
    }
}
