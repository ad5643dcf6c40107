use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{Card, ParseError, Suit};

/// Opaque handle of a shuffled deck held by a deck provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckHandle(pub String);

impl fmt::Display for DeckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phase of a Ride the Bus game.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Wager,
    RedBlack,
    HigherLower,
    InBetweenOutside,
    PickSuit,
    Result,
    Win,
}

impl Phase {
    /// Whether a guess may be submitted in this phase.
    pub fn is_guessing(self) -> bool {
        matches!(
            self,
            Phase::RedBlack | Phase::HigherLower | Phase::InBetweenOutside | Phase::PickSuit
        )
    }

    /// Whether the game has been settled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Result | Phase::Win)
    }

    /// Whether a new session may be started from this phase.
    pub fn can_start(self) -> bool {
        !self.is_guessing()
    }

    /// Phase reached after a correct guess.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::RedBlack => Some(Phase::HigherLower),
            Phase::HigherLower => Some(Phase::InBetweenOutside),
            Phase::InBetweenOutside => Some(Phase::PickSuit),
            Phase::PickSuit => Some(Phase::Win),
            Phase::Wager | Phase::Result | Phase::Win => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Wager => "wager",
            Phase::RedBlack => "redblack",
            Phase::HigherLower => "higherlower",
            Phase::InBetweenOutside => "inbetweenoutside",
            Phase::PickSuit => "picksuit",
            Phase::Result => "result",
            Phase::Win => "win",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A player's guess for the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Guess {
    Red,
    Black,
    Higher,
    Lower,
    InBetween,
    Outside,
    Suit(Suit),
}

impl Guess {
    /// The phase in which this guess is meaningful.
    pub fn phase(self) -> Phase {
        match self {
            Guess::Red | Guess::Black => Phase::RedBlack,
            Guess::Higher | Guess::Lower => Phase::HigherLower,
            Guess::InBetween | Guess::Outside => Phase::InBetweenOutside,
            Guess::Suit(_) => Phase::PickSuit,
        }
    }
}

impl fmt::Display for Guess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guess::Red => f.write_str("red"),
            Guess::Black => f.write_str("black"),
            Guess::Higher => f.write_str("higher"),
            Guess::Lower => f.write_str("lower"),
            Guess::InBetween => f.write_str("inbetween"),
            Guess::Outside => f.write_str("outside"),
            Guess::Suit(suit) => write!(f, "{}", suit.letter()),
        }
    }
}

impl FromStr for Guess {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Guess::Red),
            "black" => Ok(Guess::Black),
            "higher" => Ok(Guess::Higher),
            "lower" => Ok(Guess::Lower),
            "inbetween" => Ok(Guess::InBetween),
            "outside" => Ok(Guess::Outside),
            other => Suit::from_letter(other)
                .map(Guess::Suit)
                .ok_or_else(|| ParseError::Guess(other.to_string())),
        }
    }
}

impl TryFrom<String> for Guess {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Guess> for String {
    fn from(guess: Guess) -> Self {
        guess.to_string()
    }
}

/// State of one player's game.
///
/// Cards are written once, in draw order, and never overwritten. The fourth
/// card goes over the wire as `currentCard`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub phase: Phase,
    pub wager: Option<u64>,
    pub current_bet: u64,
    pub deck: Option<DeckHandle>,
    pub first_card: Option<Card>,
    pub second_card: Option<Card>,
    pub third_card: Option<Card>,
    #[serde(rename = "currentCard")]
    pub fourth_card: Option<Card>,
    pub is_correct: Option<bool>,
    pub last_wrong_phase: Option<Phase>,
    pub wrong_answer_card: Option<Card>,
}

impl GameSession {
    /// Session opened with `wager` on a freshly shuffled deck.
    pub fn started(wager: u64, deck: DeckHandle) -> Self {
        Self {
            phase: Phase::RedBlack,
            wager: Some(wager),
            current_bet: wager,
            deck: Some(deck),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_guessing()
    }

    /// Stake placed at the start of the session (0 before any wager).
    pub fn stake(&self) -> u64 {
        self.wager.unwrap_or(0)
    }

    /// Amount a forfeit would pay out right now.
    pub fn winnings(&self) -> u64 {
        self.current_bet.saturating_sub(self.stake())
    }

    /// Most recently drawn card.
    pub fn latest_card(&self) -> Option<&Card> {
        self.fourth_card
            .as_ref()
            .or(self.third_card.as_ref())
            .or(self.second_card.as_ref())
            .or(self.first_card.as_ref())
    }

    /// Stores `card` in the first empty slot. Returns false if all four are taken.
    pub fn push_card(&mut self, card: Card) -> bool {
        for slot in [
            &mut self.first_card,
            &mut self.second_card,
            &mut self.third_card,
            &mut self.fourth_card,
        ] {
            if slot.is_none() {
                *slot = Some(card);
                return true;
            }
        }
        false
    }

    pub fn cards_drawn(&self) -> usize {
        [
            &self.first_card,
            &self.second_card,
            &self.third_card,
            &self.fourth_card,
        ]
        .iter()
        .filter(|slot| slot.is_some())
        .count()
    }
}

/// Outcome of one resolved round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum RoundResult {
    /// Guess was correct and another round follows.
    Continue { card: Card },
    /// All four rounds were won. `payout` was credited to the balance.
    Win { card: Card, payout: u64 },
    /// Guess was wrong. `stake` was debited from the balance.
    Loss { card: Card, stake: u64 },
}

impl RoundResult {
    pub fn card(&self) -> &Card {
        match self {
            RoundResult::Continue { card }
            | RoundResult::Win { card, .. }
            | RoundResult::Loss { card, .. } => card,
        }
    }

    /// Signed balance change issued for this round, if any.
    pub fn delta(&self) -> Option<i64> {
        match self {
            RoundResult::Continue { .. } => None,
            RoundResult::Win { payout, .. } => Some(i64::try_from(*payout).unwrap_or(i64::MAX)),
            RoundResult::Loss { stake, .. } => Some(-i64::try_from(*stake).unwrap_or(i64::MAX)),
        }
    }
}
