use crate::{Error, Result};
use busride_types::{
    api::{
        AdminRequest, AdminResponse, AdminUpdateRequest, AdminUpdateResponse, BalanceResponse,
        BalanceUpdate, ErrorResponse, ForfeitResponse, GameResponse, GuessRequest,
        GuessResponse, WagerRequest, USER_HEADER,
    },
    Guess, UserId,
};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., POST) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Busride API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    user: Option<UserId>,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            user: None,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a client acting as `user`.
    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    /// Identity presented to the server, once known.
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent HTTP requests.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn registered(&self) -> Result<&UserId> {
        self.user.as_ref().ok_or(Error::Unregistered)
    }

    fn request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        let builder = self.http_client.request(method, url.clone());
        match &self.user {
            Some(user) => builder.header(USER_HEADER, user.as_str()),
            None => builder,
        }
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts =
            if method == reqwest::Method::GET || self.retry_policy.retry_non_idempotent {
                self.retry_policy.max_attempts.max(1)
            } else {
                1
            };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying request");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying request");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path)?;
        let response = self
            .send_with_retry(reqwest::Method::GET, || {
                self.request(reqwest::Method::GET, &url)
            })
            .await?;
        parse(response).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        debug!(%method, %url, "sending request");
        let response = self
            .send_with_retry(method.clone(), || {
                let builder = self.request(method.clone(), &url);
                match body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            })
            .await?;
        parse(response).await
    }

    /// Obtains an identity from the server and uses it for every later request.
    ///
    /// A client that already has one keeps it (the server recreates unknown ids).
    pub async fn register(&mut self) -> Result<BalanceResponse> {
        let response: BalanceResponse = self.get("api/balance").await?;
        if self.user.is_none() {
            info!(user = %response.user_id, "registered");
            self.user = Some(response.user_id.clone());
        }
        Ok(response)
    }

    pub async fn balance(&self) -> Result<BalanceResponse> {
        self.registered()?;
        self.get("api/balance").await
    }

    /// Applies a raw balance delta (clamped at zero by the server).
    pub async fn update_balance(&self, amount: i64) -> Result<BalanceResponse> {
        self.registered()?;
        let update = BalanceUpdate {
            amount: Some(amount),
            username: None,
        };
        self.send(reqwest::Method::POST, "api/balance", Some(&update))
            .await
    }

    /// Requests a new display name. The server ignores names that are taken.
    pub async fn set_username(&self, username: &str) -> Result<BalanceResponse> {
        self.registered()?;
        let update = BalanceUpdate {
            amount: None,
            username: Some(username.to_string()),
        };
        self.send(reqwest::Method::POST, "api/balance", Some(&update))
            .await
    }

    pub async fn game(&self) -> Result<GameResponse> {
        self.registered()?;
        self.get("api/game").await
    }

    pub async fn wager(&self, wager: i64) -> Result<GameResponse> {
        self.registered()?;
        let request = WagerRequest { wager };
        self.send(reqwest::Method::POST, "api/game/wager", Some(&request))
            .await
    }

    pub async fn guess(&self, guess: Guess) -> Result<GuessResponse> {
        self.registered()?;
        let request = GuessRequest { guess };
        self.send(reqwest::Method::POST, "api/game/guess", Some(&request))
            .await
    }

    pub async fn forfeit(&self) -> Result<ForfeitResponse> {
        self.registered()?;
        self.send::<(), _>(reqwest::Method::POST, "api/game/forfeit", None)
            .await
    }

    pub async fn reset(&self) -> Result<GameResponse> {
        self.registered()?;
        self.send::<(), _>(reqwest::Method::POST, "api/game/reset", None)
            .await
    }

    pub async fn admin_users(&self, password: &str) -> Result<AdminResponse> {
        let request = AdminRequest {
            password: password.to_string(),
        };
        self.send(reqwest::Method::POST, "api/admin", Some(&request))
            .await
    }

    pub async fn admin_update(
        &self,
        password: &str,
        updates: BTreeMap<UserId, i64>,
    ) -> Result<AdminUpdateResponse> {
        let request = AdminUpdateRequest {
            password: password.to_string(),
            updates,
        };
        self.send(reqwest::Method::PUT, "api/admin", Some(&request))
            .await
    }
}

async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let bytes = response.bytes().await?;
    match serde_json::from_slice::<ErrorResponse>(&bytes) {
        Ok(body) => Err(Error::Api {
            status,
            message: body.error,
        }),
        Err(_) => Err(Error::Failed(status)),
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
