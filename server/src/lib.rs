use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State as AxumState},
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use busride_execution::{
    bus::Error as EngineError, AccountStore, DeckProvider, Engine, Ledger, LedgerError, Memory,
};
use busride_types::{
    api::{
        AdminRequest, AdminResponse, AdminUpdateRequest, AdminUpdateResponse, AdminUser,
        BalanceResponse, BalanceUpdate, ErrorResponse, ForfeitResponse, GameResponse,
        GuessRequest, GuessResponse, WagerRequest, AUTH_COOKIE, AUTH_COOKIE_MAX_AGE, USER_HEADER,
    },
    bus::{GameSession, Guess, MAX_ID_LENGTH},
    UserId,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

pub mod config;
pub mod decks;

pub use config::{Config, ConfigError, DeckConfig, DeckSource, ValidatedConfig};
pub use decks::{Decks, RemoteDecks};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid admin password")]
    Unauthorized,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::InvalidWager { .. })
            | ApiError::Engine(EngineError::InvalidGuess { .. })
            | ApiError::Ledger(LedgerError::InvalidName)
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::InvalidPhase { .. })
            | ApiError::Ledger(LedgerError::NameTaken(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::InvalidState(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(EngineError::DeckUnavailable(_))
            | ApiError::Engine(EngineError::LedgerUnavailable(_))
            | ApiError::Ledger(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(%status, error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

/// Game backend: one engine, one ledger and the in-flight session of every user.
///
/// A user holds a session slot only while their session differs from the
/// default one.
pub struct Server<D, L = Memory> {
    engine: Engine<D, L>,
    admin_password: Option<String>,
    sessions: Mutex<HashMap<UserId, Arc<AsyncMutex<GameSession>>>>,
}

impl<D: DeckProvider, L: AccountStore> Server<D, L> {
    pub fn new(engine: Engine<D, L>, admin_password: Option<String>) -> Self {
        Self {
            engine,
            admin_password,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Engine<D, L> {
        &self.engine
    }

    fn ledger(&self) -> &L {
        self.engine.ledger()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<GameSession>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session slot of `user`. Actions on one user's session are serialized by its lock.
    fn slot(&self, user: &UserId) -> Arc<AsyncMutex<GameSession>> {
        self.sessions().entry(user.clone()).or_default().clone()
    }

    /// Drops the slot of `user` once its session is back to the default and
    /// no other request holds it. Must be called with the session locked.
    fn vacate(&self, user: &UserId, slot: &Arc<AsyncMutex<GameSession>>, session: &GameSession) {
        if *session != GameSession::default() {
            return;
        }
        let mut sessions = self.sessions();
        let unshared = sessions
            .get(user)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            sessions.remove(user);
            debug!(%user, "released session slot");
        }
    }

    /// Number of users holding a session slot.
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Balance to report after a committed action. A failed read is logged and
    /// left out of the response rather than failing the action.
    async fn settled_balance(&self, user: &UserId) -> Option<u64> {
        match self.engine.balance(user).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(%user, ?e, "balance unavailable after action");
                None
            }
        }
    }

    fn authorize(&self, password: &str) -> Result<(), ApiError> {
        match &self.admin_password {
            Some(expected) if expected == password => Ok(()),
            _ => {
                warn!("rejected admin request");
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Account summary of `user`, creating the account on first contact.
    pub fn balance(&self, user: &UserId) -> Result<BalanceResponse, ApiError> {
        let (account, created) = self.ledger().register(user)?;
        if created {
            info!(%user, name = %account.display_name, "registered user");
        }
        Ok(BalanceResponse {
            balance: account.balance,
            username: account.display_name,
            user_id: account.id,
        })
    }

    /// Applies a raw delta and/or a rename. A rename that cannot be applied is ignored.
    pub async fn update_balance(
        &self,
        user: &UserId,
        update: BalanceUpdate,
    ) -> Result<BalanceResponse, ApiError> {
        self.ledger().register(user)?;
        if let Some(amount) = update.amount {
            let balance = self.ledger().apply_delta(user, amount).await?;
            debug!(%user, amount, balance, "balance updated");
        }
        if let Some(name) = update.username.as_deref().filter(|n| !n.trim().is_empty()) {
            match self.ledger().rename(user, name) {
                Ok(account) => debug!(%user, name = %account.display_name, "renamed user"),
                Err(e @ (LedgerError::NameTaken(_) | LedgerError::InvalidName)) => {
                    debug!(%user, ?e, "ignoring rename")
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.balance(user)
    }

    pub fn admin_users(&self, request: &AdminRequest) -> Result<AdminResponse, ApiError> {
        self.authorize(&request.password)?;
        let users = self
            .ledger()
            .accounts()?
            .into_iter()
            .map(|account| AdminUser {
                id: account.id,
                name: account.display_name,
                balance: account.balance,
            })
            .collect();
        Ok(AdminResponse { users })
    }

    /// Overwrites balances. Unknown users are skipped.
    pub fn admin_update(
        &self,
        request: &AdminUpdateRequest,
    ) -> Result<AdminUpdateResponse, ApiError> {
        self.authorize(&request.password)?;
        for (user, balance) in &request.updates {
            if self.ledger().set_balance(user, *balance)?.is_none() {
                debug!(%user, "skipping balance update for unknown user");
            }
        }
        info!(count = request.updates.len(), "admin balance update");
        Ok(AdminUpdateResponse { success: true })
    }

    /// Current session of `user`. Reading never allocates a slot.
    pub async fn game(&self, user: &UserId) -> Result<GameResponse, ApiError> {
        let slot = self.sessions().get(user).cloned();
        let session = match slot {
            Some(slot) => slot.lock().await.clone(),
            None => GameSession::default(),
        };
        Ok(GameResponse {
            session,
            balance: Some(self.engine.balance(user).await?),
        })
    }

    pub async fn wager(&self, user: &UserId, wager: i64) -> Result<GameResponse, ApiError> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;
        let started = self.engine.start_session(user, &mut session, wager).await;
        self.vacate(user, &slot, &session);
        started?;
        Ok(GameResponse {
            session: session.clone(),
            balance: self.settled_balance(user).await,
        })
    }

    pub async fn guess(&self, user: &UserId, guess: Guess) -> Result<GuessResponse, ApiError> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;
        let outcome = self.engine.submit_guess(user, &mut session, guess).await;
        self.vacate(user, &slot, &session);
        Ok(GuessResponse {
            outcome: outcome?,
            session: session.clone(),
            balance: self.settled_balance(user).await,
        })
    }

    pub async fn forfeit(&self, user: &UserId) -> Result<ForfeitResponse, ApiError> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;
        let winnings = self.engine.forfeit(user, &mut session).await;
        self.vacate(user, &slot, &session);
        Ok(ForfeitResponse {
            winnings: winnings?,
            session: session.clone(),
            balance: self.settled_balance(user).await,
        })
    }

    pub async fn reset(&self, user: &UserId) -> Result<GameResponse, ApiError> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;
        let reset = self.engine.reset(&mut session);
        self.vacate(user, &slot, &session);
        reset?;
        Ok(GameResponse {
            session: session.clone(),
            balance: self.settled_balance(user).await,
        })
    }
}

/// Caller identity taken from the `x-user-id` header or the `auth_token` cookie.
/// Callers without one are issued a fresh id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user: UserId,
    pub issued: bool,
}

impl Identity {
    fn presented(parts: &Parts) -> Option<UserId> {
        let header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let cookie = || {
            parts
                .headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(name, _)| *name == AUTH_COOKIE)
                .map(|(_, value)| value.to_string())
        };
        header
            .or_else(cookie)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && id.len() <= MAX_ID_LENGTH)
            .map(UserId)
    }

    fn issue() -> Self {
        Self {
            user: UserId(uuid::Uuid::new_v4().to_string()),
            issued: true,
        }
    }

    /// Attaches the identity to `response` when it was issued by this request.
    fn attach(&self, mut response: Response) -> Response {
        if !self.issued {
            return response;
        }
        let cookie = format!(
            "{AUTH_COOKIE}={}; Path=/; Max-Age={AUTH_COOKIE_MAX_AGE}; HttpOnly; SameSite=Strict",
            self.user
        );
        match (
            HeaderValue::from_str(&cookie),
            HeaderValue::from_str(self.user.as_str()),
        ) {
            (Ok(cookie), Ok(user)) => {
                let headers = response.headers_mut();
                headers.insert(header::SET_COOKIE, cookie);
                headers.insert(HeaderName::from_static(USER_HEADER), user);
            }
            _ => warn!(user = %self.user, "issued identity is not a valid header value"),
        }
        response
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        Ok(match Self::presented(parts) {
            Some(user) => Self {
                user,
                issued: false,
            },
            None => Self::issue(),
        })
    }
}

fn respond<T: Serialize>(identity: &Identity, result: Result<T, ApiError>) -> Response {
    let response = match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    };
    identity.attach(response)
}

/// Rate limit applied per client IP.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    /// Interval at which one request is replenished.
    pub period: Duration,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(20),
            burst: 100,
        }
    }
}

pub struct Api<D, L = Memory> {
    server: Arc<Server<D, L>>,
    rate_limit: RateLimit,
}

impl<D: DeckProvider + 'static, L: AccountStore + 'static> Api<D, L> {
    pub fn new(server: Arc<Server<D, L>>, rate_limit: RateLimit) -> Self {
        Self { server, rate_limit }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_HEADER)])
            .expose_headers([HeaderName::from_static(USER_HEADER)]);

        let router = Router::new()
            .route("/api/balance", get(get_balance::<D, L>).post(post_balance::<D, L>))
            .route("/api/admin", post(admin_users::<D, L>).put(admin_update::<D, L>))
            .route("/api/game", get(get_game::<D, L>))
            .route("/api/game/wager", post(wager::<D, L>))
            .route("/api/game/guess", post(guess::<D, L>))
            .route("/api/game/forfeit", post(forfeit::<D, L>))
            .route("/api/game/reset", post(reset::<D, L>))
            .with_state(self.server.clone());

        // Configure rate limiting
        let governor_conf = GovernorConfigBuilder::default()
            .period(self.rate_limit.period)
            .burst_size(self.rate_limit.burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let Some(governor_conf) = governor_conf else {
            warn!(rate_limit = ?self.rate_limit, "invalid rate limit, serving without one");
            return router.layer(cors);
        };
        router.layer(cors).layer(GovernorLayer {
            config: Arc::new(governor_conf),
        })
    }
}

type ServerState<D, L> = AxumState<Arc<Server<D, L>>>;

async fn get_balance<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
) -> Response {
    respond(&identity, server.balance(&identity.user))
}

async fn post_balance<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
    body: Result<Json<BalanceUpdate>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(update)) => server.update_balance(&identity.user, update).await,
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

async fn admin_users<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    body: Result<Json<AdminRequest>, JsonRejection>,
) -> Response {
    let result = body
        .map_err(ApiError::from)
        .and_then(|Json(request)| server.admin_users(&request));
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn admin_update<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    body: Result<Json<AdminUpdateRequest>, JsonRejection>,
) -> Response {
    let result = body
        .map_err(ApiError::from)
        .and_then(|Json(request)| server.admin_update(&request));
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_game<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
) -> Response {
    respond(&identity, server.game(&identity.user).await)
}

async fn wager<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
    body: Result<Json<WagerRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => server.wager(&identity.user, request.wager).await,
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

async fn guess<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
    body: Result<Json<GuessRequest>, JsonRejection>,
) -> Response {
    let result = match body {
        Ok(Json(request)) => server.guess(&identity.user, request.guess).await,
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

async fn forfeit<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
) -> Response {
    respond(&identity, server.forfeit(&identity.user).await)
}

async fn reset<D: DeckProvider + 'static, L: AccountStore + 'static>(
    AxumState(server): ServerState<D, L>,
    identity: Identity,
) -> Response {
    respond(&identity, server.reset(&identity.user).await)
}
