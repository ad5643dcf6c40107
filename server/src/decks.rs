//! Deck providers available to the server.

use busride_execution::{DeckError, DeckProvider, LocalDecks};
use busride_types::bus::{Card, DeckHandle};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Deserialize)]
struct ShuffleResponse {
    success: bool,
    deck_id: String,
}

#[derive(Deserialize)]
struct DrawResponse {
    success: bool,
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    error: Option<String>,
}

/// Client of a deck-of-cards HTTP API.
pub struct RemoteDecks {
    http_client: reqwest::Client,
    base_url: Url,
}

impl RemoteDecks {
    pub fn new(mut base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeckError> {
        self.base_url
            .join(path)
            .map_err(|e| DeckError::Malformed(format!("invalid deck endpoint {path}: {e}")))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, DeckError> {
        let response = self.http_client.get(url.clone()).send().await.map_err(|e| {
            warn!(%url, ?e, "deck request failed");
            DeckError::Unavailable(e.to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeckError::Unavailable(format!("deck API returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| DeckError::Malformed(e.to_string()))
    }

    async fn shuffle(&self) -> Result<DeckHandle, DeckError> {
        let url = self.endpoint("api/deck/new/shuffle/?deck_count=1")?;
        let response: ShuffleResponse = self.get(url).await?;
        if !response.success {
            return Err(DeckError::Unavailable("shuffle was not successful".to_string()));
        }
        debug!(deck = %response.deck_id, "shuffled remote deck");
        Ok(DeckHandle(response.deck_id))
    }

    async fn draw(&self, deck: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        let url = self.endpoint(&format!("api/deck/{deck}/draw/?count={count}"))?;
        let response: DrawResponse = self.get(url).await?;
        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "draw was not successful".to_string());
            return Err(DeckError::Unavailable(reason));
        }
        if response.cards.len() != count {
            return Err(DeckError::Malformed(format!(
                "requested {count} cards, received {}",
                response.cards.len()
            )));
        }
        Ok(response.cards)
    }
}

impl DeckProvider for RemoteDecks {
    async fn new_shuffled_deck(&self) -> Result<DeckHandle, DeckError> {
        self.shuffle().await
    }

    async fn draw_cards(&self, deck: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        self.draw(deck, count).await
    }
}

/// Deck provider selected at startup.
pub enum Decks {
    Local(LocalDecks),
    Remote(RemoteDecks),
}

impl DeckProvider for Decks {
    async fn new_shuffled_deck(&self) -> Result<DeckHandle, DeckError> {
        match self {
            Decks::Local(decks) => decks.new_shuffled_deck().await,
            Decks::Remote(decks) => decks.new_shuffled_deck().await,
        }
    }

    async fn draw_cards(&self, deck: &DeckHandle, count: usize) -> Result<Vec<Card>, DeckError> {
        match self {
            Decks::Local(decks) => decks.draw_cards(deck, count).await,
            Decks::Remote(decks) => decks.draw_cards(deck, count).await,
        }
    }

    fn release(&self, deck: &DeckHandle) {
        match self {
            Decks::Local(decks) => decks.release(deck),
            Decks::Remote(decks) => decks.release(deck),
        }
    }
}
