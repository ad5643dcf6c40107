use super::{rules, Action, Config, Error};
use crate::{
    deck::{DeckError, DeckProvider},
    ledger::{Ledger, LedgerError},
};
use busride_types::bus::{GameSession, Guess, RoundResult, UserId};
use std::future::Future;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Drives one player's [GameSession] through a game.
///
/// The engine owns no sessions: callers pass the session in and are
/// responsible for serializing actions on it. Every action either succeeds or
/// leaves the session (and the balance) as it was.
pub struct Engine<D, L> {
    decks: D,
    ledger: L,
    config: Config,
}

impl<D: DeckProvider, L: Ledger> Engine<D, L> {
    pub fn new(decks: D, ledger: L, config: Config) -> Self {
        Self {
            decks,
            ledger,
            config,
        }
    }

    pub fn decks(&self) -> &D {
        &self.decks
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn deck_call<T>(
        &self,
        call: impl Future<Output = Result<T, DeckError>>,
    ) -> Result<T, Error> {
        match timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(?e, "deck call failed");
                Err(Error::DeckUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(timeout = ?self.config.call_timeout, "deck call timed out");
                Err(Error::DeckUnavailable("timed out".to_string()))
            }
        }
    }

    async fn ledger_call<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, Error> {
        match timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(?e, "ledger call failed");
                Err(Error::LedgerUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(timeout = ?self.config.call_timeout, "ledger call timed out");
                Err(Error::LedgerUnavailable("timed out".to_string()))
            }
        }
    }

    fn release_deck(&self, session: &GameSession) {
        if let Some(deck) = &session.deck {
            self.decks.release(deck);
        }
    }

    /// Current balance of `user`.
    pub async fn balance(&self, user: &UserId) -> Result<u64, Error> {
        self.ledger_call(self.ledger.balance(user)).await
    }

    /// Starts a new game staking `wager`.
    pub async fn start_session(
        &self,
        user: &UserId,
        session: &mut GameSession,
        wager: i64,
    ) -> Result<(), Error> {
        if !session.phase.can_start() {
            return Err(Error::InvalidPhase {
                action: Action::Start,
                phase: session.phase,
            });
        }
        let invalid = |balance| Error::InvalidWager {
            wager,
            minimum: self.config.min_wager,
            balance,
        };
        let stake = u64::try_from(wager)
            .ok()
            .filter(|stake| *stake >= self.config.min_wager)
            .ok_or_else(|| invalid(None))?;

        let balance = self.balance(user).await?;
        if stake > balance {
            debug!(%user, stake, balance, "wager exceeds balance");
            return Err(invalid(Some(balance)));
        }

        let deck = self.deck_call(self.decks.new_shuffled_deck()).await?;
        debug!(%user, stake, %deck, "game started");
        *session = GameSession::started(stake, deck);
        Ok(())
    }

    /// Draws one card and resolves `guess` against it.
    ///
    /// On a terminal outcome the balance delta is applied before the session
    /// is updated, so a ledger failure leaves the game where it was.
    pub async fn submit_guess(
        &self,
        user: &UserId,
        session: &mut GameSession,
        guess: Guess,
    ) -> Result<RoundResult, Error> {
        if !session.phase.is_guessing() {
            return Err(Error::InvalidPhase {
                action: Action::Guess,
                phase: session.phase,
            });
        }
        rules::check(session, guess)?;
        let deck = session
            .deck
            .as_ref()
            .ok_or(Error::InvalidState("missing deck"))?;

        let card = self
            .deck_call(self.decks.draw_cards(deck, 1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DeckUnavailable("no card drawn".to_string()))?;
        debug!(%user, phase = %session.phase, %guess, %card, "drew card");

        let mut next = session.clone();
        let result = rules::resolve(&mut next, guess, card)?;
        if let Some(delta) = result.delta() {
            let balance = self.ledger_call(self.ledger.apply_delta(user, delta)).await?;
            info!(%user, delta, balance, phase = %next.phase, "game settled");
        }
        *session = next;
        if session.phase.is_terminal() {
            self.release_deck(session);
        }
        Ok(result)
    }

    /// Abandons the current game, paying out what the bet has grown by.
    /// Returns the winnings credited.
    pub async fn forfeit(&self, user: &UserId, session: &mut GameSession) -> Result<u64, Error> {
        if !session.phase.is_guessing() {
            return Err(Error::InvalidPhase {
                action: Action::Forfeit,
                phase: session.phase,
            });
        }
        let winnings = session.winnings();
        if winnings > 0 {
            let delta = i64::try_from(winnings).unwrap_or(i64::MAX);
            let balance = self.ledger_call(self.ledger.apply_delta(user, delta)).await?;
            info!(%user, winnings, balance, "game forfeited");
        } else {
            debug!(%user, "game forfeited without winnings");
        }
        self.release_deck(session);
        *session = GameSession::default();
        Ok(winnings)
    }

    /// Clears a settled game so a new one can be started.
    pub fn reset(&self, session: &mut GameSession) -> Result<(), Error> {
        if !session.phase.is_terminal() {
            return Err(Error::InvalidPhase {
                action: Action::Reset,
                phase: session.phase,
            });
        }
        *session = GameSession::default();
        Ok(())
    }
}
