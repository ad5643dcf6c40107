//! Ride the Bus round engine.
//!
//! A game is four rounds played against one shuffled deck:
//! - red/black on the first card
//! - higher/lower than the first card
//! - in between/outside the first two cards
//! - the suit of the fourth card
//!
//! A correct red/black guess doubles the bet and every later correct guess adds
//! the initial wager. A wrong guess at any point loses the wager. Surviving
//! all four rounds pays out the accumulated bet. Between rounds the player may
//! forfeit and keep whatever the bet has grown by.

mod engine;
pub mod rules;


pub use engine::Engine;

use busride_types::bus::{Guess, Phase, MIN_WAGER};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Default timeout applied to every deck and ledger call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Player action, used to report which action a phase rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Guess,
    Forfeit,
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start a game",
            Action::Guess => "guess",
            Action::Forfeit => "forfeit",
            Action::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Errors returned by the engine. A failed action never changes the session
/// or the balance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid wager {wager}: must be at least {minimum} and at most the balance")]
    InvalidWager {
        wager: i64,
        minimum: u64,
        balance: Option<u64>,
    },
    #[error("cannot {action} during {phase}")]
    InvalidPhase { action: Action, phase: Phase },
    #[error("guess {guess} is not valid during {phase}")]
    InvalidGuess { guess: Guess, phase: Phase },
    #[error("inconsistent session: {0}")]
    InvalidState(&'static str),
    #[error("deck unavailable: {0}")]
    DeckUnavailable(String),
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

/// Engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Smallest wager accepted by [Engine::start_session].
    pub min_wager: u64,
    /// Upper bound on each deck or ledger call.
    pub call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_wager: MIN_WAGER,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}
