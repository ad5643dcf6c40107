//! Round resolution.
//!
//! Pure functions over a [GameSession]: no I/O, no ledger access. The engine
//! validates with [check], draws a card and then calls [resolve].

use super::Error;
use busride_types::bus::{Card, Color, GameSession, Guess, Phase, RoundResult, MAX_BET};

/// Cards that must already be on the table before a guess in `phase`.
fn cards_before(phase: Phase) -> Option<usize> {
    match phase {
        Phase::RedBlack => Some(0),
        Phase::HigherLower => Some(1),
        Phase::InBetweenOutside => Some(2),
        Phase::PickSuit => Some(3),
        Phase::Wager | Phase::Result | Phase::Win => None,
    }
}

/// Verifies that `guess` can be resolved against `session` without drawing.
pub fn check(session: &GameSession, guess: Guess) -> Result<(), Error> {
    if guess.phase() != session.phase {
        return Err(Error::InvalidGuess {
            guess,
            phase: session.phase,
        });
    }
    let expected = cards_before(session.phase).ok_or(Error::InvalidState("not guessing"))?;
    if session.cards_drawn() != expected {
        return Err(Error::InvalidState("card count does not match phase"));
    }
    if session.wager.is_none() {
        return Err(Error::InvalidState("missing wager"));
    }
    Ok(())
}

/// Whether `guess` is right about `card`, given the cards already drawn.
pub fn is_correct(session: &GameSession, guess: Guess, card: &Card) -> Result<bool, Error> {
    let correct = match guess {
        Guess::Red => card.color() == Color::Red,
        Guess::Black => card.color() == Color::Black,
        Guess::Higher | Guess::Lower => {
            let first = session
                .first_card
                .as_ref()
                .ok_or(Error::InvalidState("missing first card"))?;
            // A tie is wrong either way
            match guess {
                Guess::Higher => card.rank() > first.rank(),
                _ => card.rank() < first.rank(),
            }
        }
        Guess::InBetween | Guess::Outside => {
            let (first, second) = session
                .first_card
                .as_ref()
                .zip(session.second_card.as_ref())
                .ok_or(Error::InvalidState("missing first two cards"))?;
            let low = first.rank().min(second.rank());
            let high = first.rank().max(second.rank());
            let between = low < card.rank() && card.rank() < high;
            // Landing on a bound counts as outside
            match guess {
                Guess::InBetween => between,
                _ => !between,
            }
        }
        Guess::Suit(suit) => card.suit == suit,
    };
    Ok(correct)
}

/// Applies `card` to `session` for `guess`.
///
/// Terminal outcomes carry the balance delta the caller must issue. On error
/// `session` is left unchanged.
pub fn resolve(session: &mut GameSession, guess: Guess, card: Card) -> Result<RoundResult, Error> {
    check(session, guess)?;
    let correct = is_correct(session, guess, &card)?;
    let wager = session.stake();
    let phase = session.phase;
    let next = phase.next().ok_or(Error::InvalidState("no phase follows"))?;

    if !session.push_card(card.clone()) {
        return Err(Error::InvalidState("all card slots are taken"));
    }
    session.is_correct = Some(correct);

    if !correct {
        session.phase = Phase::Result;
        session.last_wrong_phase = Some(phase);
        session.wrong_answer_card = Some(card.clone());
        return Ok(RoundResult::Loss { card, stake: wager });
    }

    let bet = match phase {
        Phase::RedBlack => session.current_bet.saturating_mul(2),
        Phase::PickSuit => session.current_bet,
        _ => session.current_bet.saturating_add(wager),
    };
    session.current_bet = bet.min(MAX_BET);
    session.phase = next;
    if next == Phase::Win {
        return Ok(RoundResult::Win {
            card,
            payout: session.current_bet,
        });
    }
    Ok(RoundResult::Continue { card })
}

#[cfg(test)]
mod tests {
    use super::*;
    use busride_types::bus::{DeckHandle, Suit, Value};

    fn card(value: Value, suit: Suit) -> Card {
        Card::new(value, suit)
    }

    fn session_with(wager: u64, cards: &[Card], phase: Phase) -> GameSession {
        let mut session = GameSession::started(wager, DeckHandle("deck".to_string()));
        for c in cards {
            session.push_card(c.clone());
        }
        session.phase = phase;
        session
    }

    #[test]
    fn test_red_black() {
        let mut session = session_with(50, &[], Phase::RedBlack);
        let result = resolve(&mut session, Guess::Red, card(Value::Two, Suit::Diamonds)).unwrap();
        assert!(matches!(result, RoundResult::Continue { .. }));
        assert_eq!(session.phase, Phase::HigherLower);
        assert_eq!(session.current_bet, 100);
        assert_eq!(session.is_correct, Some(true));

        let mut session = session_with(50, &[], Phase::RedBlack);
        let result = resolve(&mut session, Guess::Red, card(Value::Two, Suit::Spades)).unwrap();
        assert_eq!(
            result,
            RoundResult::Loss {
                card: card(Value::Two, Suit::Spades),
                stake: 50
            }
        );
        assert_eq!(session.phase, Phase::Result);
        assert_eq!(session.last_wrong_phase, Some(Phase::RedBlack));
        assert_eq!(session.wrong_answer_card, Some(card(Value::Two, Suit::Spades)));
        assert_eq!(session.first_card, Some(card(Value::Two, Suit::Spades)));
        assert_eq!(session.current_bet, 50);
    }

    #[test]
    fn test_higher_lower_tie_is_wrong() {
        let seven = card(Value::Seven, Suit::Hearts);
        for guess in [Guess::Higher, Guess::Lower] {
            let mut session = session_with(10, &[seven.clone()], Phase::HigherLower);
            session.current_bet = 20;
            let result = resolve(&mut session, guess, card(Value::Seven, Suit::Clubs)).unwrap();
            assert!(matches!(result, RoundResult::Loss { stake: 10, .. }));
        }

        let mut session = session_with(10, &[seven.clone()], Phase::HigherLower);
        session.current_bet = 20;
        resolve(&mut session, Guess::Lower, card(Value::Ace, Suit::Clubs)).unwrap();
        assert_eq!(session.phase, Phase::InBetweenOutside);
        assert_eq!(session.current_bet, 30);
        assert_eq!(session.second_card, Some(card(Value::Ace, Suit::Clubs)));
    }

    #[test]
    fn test_in_between_bounds_count_as_outside() {
        let cards = [card(Value::Four, Suit::Hearts), card(Value::Nine, Suit::Spades)];
        let cases = [
            (Value::Six, Guess::InBetween, true),
            (Value::Six, Guess::Outside, false),
            (Value::Four, Guess::InBetween, false),
            (Value::Nine, Guess::Outside, true),
            (Value::King, Guess::Outside, true),
            (Value::Two, Guess::Outside, true),
            (Value::Two, Guess::InBetween, false),
            (Value::Ace, Guess::InBetween, false),
        ];
        for (value, guess, expected) in cases {
            let session = session_with(10, &cards, Phase::InBetweenOutside);
            assert_eq!(
                is_correct(&session, guess, &card(value, Suit::Clubs)).unwrap(),
                expected,
                "{value} {guess}"
            );
        }

        // Order of the first two cards does not matter
        let reversed = [cards[1].clone(), cards[0].clone()];
        let session = session_with(10, &reversed, Phase::InBetweenOutside);
        assert!(is_correct(&session, Guess::InBetween, &card(Value::Five, Suit::Clubs)).unwrap());
    }

    #[test]
    fn test_pick_suit_win() {
        let cards = [
            card(Value::Two, Suit::Hearts),
            card(Value::Five, Suit::Clubs),
            card(Value::Nine, Suit::Clubs),
        ];
        let mut session = session_with(50, &cards, Phase::PickSuit);
        session.current_bet = 200;
        let result = resolve(
            &mut session,
            Guess::Suit(Suit::Hearts),
            card(Value::Queen, Suit::Hearts),
        )
        .unwrap();
        assert_eq!(result.delta(), Some(200));
        assert_eq!(session.phase, Phase::Win);
        assert_eq!(session.current_bet, 200);
        assert_eq!(session.fourth_card, Some(card(Value::Queen, Suit::Hearts)));
    }

    #[test]
    fn test_bet_is_capped_at_signed_range() {
        let wager = 1u64 << 62;
        let mut session = session_with(wager, &[], Phase::RedBlack);
        resolve(&mut session, Guess::Red, card(Value::Ace, Suit::Hearts)).unwrap();
        assert_eq!(session.current_bet, MAX_BET);
        resolve(&mut session, Guess::Higher, card(Value::King, Suit::Hearts)).unwrap();
        assert_eq!(session.current_bet, MAX_BET);
        resolve(&mut session, Guess::Outside, card(Value::Ace, Suit::Spades)).unwrap();
        let result = resolve(
            &mut session,
            Guess::Suit(Suit::Hearts),
            card(Value::Three, Suit::Hearts),
        )
        .unwrap();
        assert_eq!(result.delta(), Some(i64::MAX));
        assert_eq!(session.winnings(), MAX_BET - wager);
    }

    #[test]
    fn test_guess_must_match_phase() {
        let mut session = session_with(10, &[], Phase::RedBlack);
        let before = session.clone();
        assert_eq!(
            resolve(&mut session, Guess::Higher, card(Value::Two, Suit::Hearts)),
            Err(Error::InvalidGuess {
                guess: Guess::Higher,
                phase: Phase::RedBlack
            })
        );
        assert_eq!(session, before);
    }

    #[test]
    fn test_inconsistent_card_count() {
        let session = session_with(10, &[], Phase::HigherLower);
        assert!(matches!(
            check(&session, Guess::Higher),
            Err(Error::InvalidState(_))
        ));
    }
}
