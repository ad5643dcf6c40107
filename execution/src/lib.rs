pub mod bus;
pub mod deck;
pub mod ledger;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use bus::{Action, Config, Engine, Error};
pub use deck::{DeckError, DeckProvider, GameRng, LocalDecks};
pub use ledger::{AccountStore, Ledger, LedgerError, Memory, Sqlite};
