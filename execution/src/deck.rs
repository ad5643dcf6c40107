//! Deck providers.
//!
//! The Round Engine only ever asks for a new shuffled deck and for the next
//! card(s) of a deck it was handed, and hands the deck back once the game is
//! over. [LocalDecks] serves decks from memory using a SHA-256 hash chain, so a
//! given seed always deals the same cards.

use busride_types::bus::{Card, DeckHandle, DECK_SIZE};
use commonware_cryptography::{sha256::Sha256, Hasher};
use commonware_utils::{from_hex, hex};
use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Decks [LocalDecks] holds at once. Shuffles beyond this fail until decks are released.
pub const MAX_LOCAL_DECKS: usize = 65_536;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeckError {
    #[error("unknown deck: {0}")]
    UnknownDeck(DeckHandle),
    #[error("deck exhausted: requested {requested}, remaining {remaining}")]
    Exhausted { requested: usize, remaining: usize },
    #[error("deck provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed deck response: {0}")]
    Malformed(String),
    #[error("too many decks in play ({0})")]
    Full(usize),
}

/// Source of shuffled decks.
pub trait DeckProvider: Send + Sync {
    /// Allocates a freshly shuffled deck.
    fn new_shuffled_deck(&self) -> impl Future<Output = Result<DeckHandle, DeckError>> + Send;

    /// Draws `count` cards from the top of `deck`, in order.
    fn draw_cards(
        &self,
        deck: &DeckHandle,
        count: usize,
    ) -> impl Future<Output = Result<Vec<Card>, DeckError>> + Send;

    /// Signals that no more cards will be drawn from `deck`.
    fn release(&self, _deck: &DeckHandle) {}
}

/// Deterministic random number generator built from a SHA-256 hash chain.
#[derive(Clone)]
pub struct GameRng {
    state: [u8; 32],
    index: usize,
}

impl GameRng {
    /// Create a new RNG from a seed and a deck number.
    pub fn new(seed: &[u8; 32], deck: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(&deck.to_be_bytes());
        Self {
            state: hasher.finalize().0,
            index: 0,
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.index >= 32 {
            let mut hasher = Sha256::new();
            hasher.update(&self.state);
            self.state = hasher.finalize().0;
            self.index = 0;
        }
        let result = self.state[self.index];
        self.index += 1;
        result
    }

    /// Get a random value in range [0, max).
    pub fn next_bounded(&mut self, max: u8) -> u8 {
        if max == 0 {
            return 0;
        }
        // Rejection sampling keeps the distribution unbiased
        let limit = u8::MAX - (u8::MAX % max);
        loop {
            let value = self.next_byte();
            if value < limit {
                return value % max;
            }
        }
    }

    /// Shuffle a slice in place using Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.next_bounded((i + 1) as u8) as usize;
            slice.swap(i, j);
        }
    }

    /// Create a shuffled deck of card indices (0-51).
    pub fn create_deck(&mut self) -> Vec<u8> {
        let mut deck: Vec<u8> = (0..DECK_SIZE).collect();
        self.shuffle(&mut deck);
        deck
    }
}

/// In-memory deck provider.
///
/// Handles are the deck number in hex. A deck is held until it is released,
/// and at most [MAX_LOCAL_DECKS] are held at once.
pub struct LocalDecks {
    seed: [u8; 32],
    next: AtomicU64,
    decks: Mutex<BTreeMap<u64, Vec<u8>>>,
}

impl LocalDecks {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            next: AtomicU64::new(0),
            decks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Provider seeded from the thread RNG.
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    fn handle(id: u64) -> DeckHandle {
        DeckHandle(hex(&id.to_be_bytes()))
    }

    fn parse(handle: &DeckHandle) -> Option<u64> {
        let bytes: [u8; 8] = from_hex(&handle.0)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<u64, Vec<u8>>>, DeckError> {
        self.decks.lock().map_err(|e| {
            error!("Failed to acquire deck lock: {}", e);
            DeckError::Unavailable("deck store poisoned".to_string())
        })
    }

    fn shuffle(&self) -> Result<DeckHandle, DeckError> {
        let mut decks = self.lock()?;
        if decks.len() >= MAX_LOCAL_DECKS {
            warn!(held = decks.len(), "refusing to shuffle, deck store is full");
            return Err(DeckError::Full(decks.len()));
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        decks.insert(id, GameRng::new(&self.seed, id).create_deck());
        debug!(deck = id, "shuffled local deck");
        Ok(Self::handle(id))
    }

    fn draw(&self, handle: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        let id = Self::parse(handle).ok_or_else(|| DeckError::UnknownDeck(handle.clone()))?;
        let mut decks = self.lock()?;
        let deck = decks
            .get_mut(&id)
            .ok_or_else(|| DeckError::UnknownDeck(handle.clone()))?;
        if deck.len() < count {
            return Err(DeckError::Exhausted {
                requested: count,
                remaining: deck.len(),
            });
        }

        // The end of the vector is the top of the deck
        let split = deck.len() - count;
        let drawn: Vec<u8> = deck.drain(split..).rev().collect();
        drawn
            .into_iter()
            .map(|index| Card::from_index(index).map_err(|e| DeckError::Malformed(e.to_string())))
            .collect()
    }

    /// Cards left in `handle`, if the deck is still held.
    pub fn remaining(&self, handle: &DeckHandle) -> Option<usize> {
        let id = Self::parse(handle)?;
        let decks = self.decks.lock().ok()?;
        decks.get(&id).map(Vec::len)
    }

    /// Number of decks currently held.
    pub fn held(&self) -> usize {
        self.decks.lock().map(|decks| decks.len()).unwrap_or(0)
    }
}

impl DeckProvider for LocalDecks {
    async fn new_shuffled_deck(&self) -> Result<DeckHandle, DeckError> {
        self.shuffle()
    }

    async fn draw_cards(&self, deck: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        self.draw(deck, count)
    }

    fn release(&self, deck: &DeckHandle) {
        let Some(id) = Self::parse(deck) else {
            return;
        };
        if let Ok(mut decks) = self.lock() {
            if decks.remove(&id).is_some() {
                debug!(deck = id, "released local deck");
            }
        }
    }
}
