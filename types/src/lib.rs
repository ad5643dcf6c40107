//! Common types used throughout busride.

pub mod api;
pub mod bus;

pub use bus::{Account, Card, GameSession, Guess, Phase, Suit, UserId, Value};
