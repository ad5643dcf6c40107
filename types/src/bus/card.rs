use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use super::CARD_IMAGE_BASE;

/// Number of cards in a standard deck.
pub const DECK_SIZE: u8 = 52;

/// Error returned when a card component cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown card value: {0}")]
    Value(String),
    #[error("unknown suit: {0}")]
    Suit(String),
    #[error("unknown guess: {0}")]
    Guess(String),
    #[error("card index out of range: {0}")]
    Index(u8),
}

/// Card value. Ace is always low.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    #[serde(rename = "ACE")]
    Ace,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "9")]
    Nine,
    #[serde(rename = "10")]
    Ten,
    #[serde(rename = "JACK")]
    Jack,
    #[serde(rename = "QUEEN")]
    Queen,
    #[serde(rename = "KING")]
    King,
}

impl Value {
    pub const ALL: [Value; 13] = [
        Value::Ace,
        Value::Two,
        Value::Three,
        Value::Four,
        Value::Five,
        Value::Six,
        Value::Seven,
        Value::Eight,
        Value::Nine,
        Value::Ten,
        Value::Jack,
        Value::Queen,
        Value::King,
    ];

    /// Rank used for comparisons (Ace = 1, ..., King = 13).
    pub fn rank(self) -> u8 {
        self as u8 + 1
    }

    /// Name used by the deck API ("ACE", "10", "KING").
    pub fn name(self) -> &'static str {
        match self {
            Value::Ace => "ACE",
            Value::Two => "2",
            Value::Three => "3",
            Value::Four => "4",
            Value::Five => "5",
            Value::Six => "6",
            Value::Seven => "7",
            Value::Eight => "8",
            Value::Nine => "9",
            Value::Ten => "10",
            Value::Jack => "JACK",
            Value::Queen => "QUEEN",
            Value::King => "KING",
        }
    }

    fn code(self) -> char {
        match self {
            Value::Ace => 'A',
            Value::Ten => '0',
            Value::Jack => 'J',
            Value::Queen => 'Q',
            Value::King => 'K',
            other => char::from(b'0' + other.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Value {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Value::ALL
            .into_iter()
            .find(|value| value.name() == s)
            .ok_or_else(|| ParseError::Value(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    pub fn color(self) -> Color {
        match self {
            Suit::Hearts | Suit::Diamonds => Color::Red,
            Suit::Clubs | Suit::Spades => Color::Black,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Suit::Spades => "SPADES",
            Suit::Hearts => "HEARTS",
            Suit::Diamonds => "DIAMONDS",
            Suit::Clubs => "CLUBS",
        }
    }

    /// Single lower-case letter players use to pick a suit.
    pub fn letter(self) -> char {
        match self {
            Suit::Spades => 's',
            Suit::Hearts => 'h',
            Suit::Diamonds => 'd',
            Suit::Clubs => 'c',
        }
    }

    pub fn from_letter(letter: &str) -> Option<Suit> {
        Suit::ALL
            .into_iter()
            .find(|suit| letter.len() == 1 && letter.starts_with(suit.letter()))
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Suit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Suit::ALL
            .into_iter()
            .find(|suit| suit.name() == s)
            .ok_or_else(|| ParseError::Suit(s.to_string()))
    }
}

/// A drawn card.
///
/// `code` and `image` are opaque references handed out by the deck provider
/// (the deck API's two-character code and an image URL).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub code: String,
    pub image: String,
    pub value: Value,
    pub suit: Suit,
}

impl Card {
    /// Builds a card with the deck API's code and image conventions.
    pub fn new(value: Value, suit: Suit) -> Self {
        let code = format!("{}{}", value.code(), suit.letter().to_ascii_uppercase());
        let image = format!("{CARD_IMAGE_BASE}/{code}.png");
        Self {
            code,
            image,
            value,
            suit,
        }
    }

    /// Maps a deck index (0-51) to a card: suit = index / 13, value = index % 13.
    pub fn from_index(index: u8) -> Result<Self, ParseError> {
        if index >= DECK_SIZE {
            return Err(ParseError::Index(index));
        }
        let suit = Suit::ALL[(index / 13) as usize];
        let value = Value::ALL[(index % 13) as usize];
        Ok(Self::new(value, suit))
    }

    pub fn rank(&self) -> u8 {
        self.value.rank()
    }

    pub fn color(&self) -> Color {
        self.suit.color()
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.value, self.suit)
    }
}
