pub mod client;

pub use client::Client;
pub use client::RetryPolicy;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("server rejected request ({status}): {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("client has no identity yet, call register first")]
    Unregistered,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use busride_execution::{
        mocks::{card, ScriptedDecks},
        Config as EngineConfig, Engine, Memory,
    };
    use busride_server::{Api, RateLimit, Server};
    use busride_types::{
        bus::{Phase, RoundResult, Suit, Value},
        Card, Guess, UserId,
    };
    use std::{
        collections::BTreeMap,
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio::time::sleep;

    const PASSWORD: &str = "letmein";

    struct TestContext {
        server: Arc<Server<ScriptedDecks>>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new(cards: Vec<Card>) -> Self {
            let engine = Engine::new(
                ScriptedDecks::new(cards),
                Memory::default(),
                EngineConfig::default(),
            );
            let server = Arc::new(Server::new(engine, Some(PASSWORD.to_string())));
            let api = Api::new(server.clone(), RateLimit::default());

            // Start server on random port
            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let router = api.router();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}");

            let server_handle = tokio::spawn(async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });

            // Give server time to start
            sleep(Duration::from_millis(100)).await;

            Self {
                server,
                base_url,
                server_handle,
            }
        }

        async fn create_client(&self) -> Client {
            let mut client = Client::new(&self.base_url).unwrap();
            client.register().await.unwrap();
            client
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    #[tokio::test]
    async fn test_client_register_and_balance() {
        let ctx = TestContext::new(vec![]).await;
        let mut client = Client::new(&ctx.base_url).unwrap();
        assert!(matches!(client.balance().await, Err(Error::Unregistered)));

        let registered = client.register().await.unwrap();
        assert_eq!(registered.balance, 300);
        assert_eq!(client.user(), Some(&registered.user_id));

        // Registering again keeps the identity
        client.register().await.unwrap();
        assert_eq!(client.user(), Some(&registered.user_id));

        let balance = client.update_balance(-1_000).await.unwrap();
        assert_eq!(balance.balance, 0);
        let balance = client.update_balance(40).await.unwrap();
        assert_eq!(balance.balance, 40);

        let renamed = client.set_username("Rider").await.unwrap();
        assert_eq!(renamed.username, "Rider");
        assert_eq!(client.balance().await.unwrap().username, "Rider");
    }

    #[tokio::test]
    async fn test_client_known_identity() {
        let ctx = TestContext::new(vec![]).await;
        let client = Client::new(&ctx.base_url)
            .unwrap()
            .with_user(UserId::from("user_1700000000_abc"));
        let balance = client.balance().await.unwrap();
        assert_eq!(balance.user_id, UserId::from("user_1700000000_abc"));
        assert_eq!(balance.balance, 300);
    }

    #[tokio::test]
    async fn test_client_plays_a_game() {
        let ctx = TestContext::new(vec![
            card(Value::Two, Suit::Hearts),
            card(Value::Nine, Suit::Spades),
            card(Value::Five, Suit::Diamonds),
            card(Value::King, Suit::Hearts),
        ])
        .await;
        let client = ctx.create_client().await;

        let game = client.wager(50).await.unwrap();
        assert_eq!(game.session.phase, Phase::RedBlack);

        for (guess, bet) in [(Guess::Red, 100), (Guess::Higher, 150), (Guess::InBetween, 200)] {
            let response = client.guess(guess).await.unwrap();
            assert!(matches!(response.outcome, RoundResult::Continue { .. }));
            assert_eq!(response.session.current_bet, bet);
        }

        let response = client.guess(Guess::Suit(Suit::Hearts)).await.unwrap();
        assert!(matches!(response.outcome, RoundResult::Win { payout: 200, .. }));
        assert_eq!(response.session.phase, Phase::Win);
        assert_eq!(response.balance, Some(500));

        let game = client.reset().await.unwrap();
        assert_eq!(game.session.phase, Phase::Wager);
        assert_eq!(client.game().await.unwrap().balance, Some(500));
    }

    #[tokio::test]
    async fn test_client_forfeit() {
        let ctx = TestContext::new(vec![card(Value::Ace, Suit::Diamonds)]).await;
        let client = ctx.create_client().await;

        client.wager(20).await.unwrap();
        client.guess(Guess::Red).await.unwrap();
        let response = client.forfeit().await.unwrap();
        assert_eq!(response.winnings, 20);
        assert_eq!(response.balance, Some(320));
        assert_eq!(response.session.phase, Phase::Wager);
    }

    #[tokio::test]
    async fn test_client_api_errors() {
        let ctx = TestContext::new(vec![]).await;
        let client = ctx.create_client().await;

        match client.wager(500).await {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(message.contains("invalid wager"));
            }
            other => panic!("unexpected {other:?}"),
        }

        match client.reset().await {
            Err(Error::Api { status, .. }) => assert_eq!(status, reqwest::StatusCode::CONFLICT),
            other => panic!("unexpected {other:?}"),
        }

        // The scripted deck has no cards left to deal
        client.wager(10).await.unwrap();
        match client.guess(Guess::Black).await {
            Err(Error::Api { status, .. }) => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.game().await.unwrap().session.phase, Phase::RedBlack);
    }

    #[tokio::test]
    async fn test_client_admin() {
        let ctx = TestContext::new(vec![]).await;
        let client = ctx.create_client().await;
        let user = client.user().cloned().unwrap();

        match client.admin_users("wrong").await {
            Err(Error::Api { status, .. }) => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED)
            }
            other => panic!("unexpected {other:?}"),
        }

        let users = client.admin_users(PASSWORD).await.unwrap().users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, user);

        let updates = BTreeMap::from([(user.clone(), 1_000)]);
        assert!(client.admin_update(PASSWORD, updates).await.unwrap().success);
        assert_eq!(client.balance().await.unwrap().balance, 1_000);
        assert_eq!(ctx.server.balance(&user).unwrap().balance, 1_000);
    }

    async fn flaky_server(
        failures: usize,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/api/game",
            get(move || {
                let counter = counter.clone();
                async move {
                    let hit = counter.fetch_add(1, Ordering::SeqCst);
                    if hit < failures {
                        return Err(StatusCode::SERVICE_UNAVAILABLE);
                    }
                    Ok(Json(serde_json::json!({
                        "session": busride_types::GameSession::default(),
                        "balance": 300
                    })))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (base_url, hits, handle)
    }

    #[tokio::test]
    async fn test_client_retries_idempotent_requests() {
        let (base_url, hits, handle) = flaky_server(2).await;
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            retry_non_idempotent: false,
        };
        let client = Client::new(&base_url)
            .unwrap()
            .with_user(UserId::from("user_1"))
            .with_retry_policy(policy);
        let game = client.game().await.unwrap();
        assert_eq!(game.balance, Some(300));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // Without retries the first failure is returned
        let (base_url, hits, handle2) = flaky_server(1).await;
        let client = Client::new(&base_url)
            .unwrap()
            .with_user(UserId::from("user_1"));
        assert_eq!(client.retry_policy(), RetryPolicy::default());
        assert!(matches!(
            client.game().await,
            Err(Error::Failed(status)) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.abort();
        handle2.abort();
    }

    #[test]
    fn test_client_invalid_scheme() {
        let result = Client::new("ftp://example.com");
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidScheme(_)));
            assert_eq!(
                err.to_string(),
                "invalid URL scheme: ftp (expected http or https)"
            );
        }

        assert!(Client::new("http://localhost:8080").is_ok());
        assert!(Client::new("https://localhost:8080").is_ok());
    }
}
