//! JSON payloads exchanged with the HTTP API.

use crate::bus::{GameSession, Guess, RoundResult, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the caller's identity.
pub const USER_HEADER: &str = "x-user-id";

/// Cookie carrying the caller's identity.
pub const AUTH_COOKIE: &str = "auth_token";

/// Lifetime of the identity cookie in seconds (30 days).
pub const AUTH_COOKIE_MAX_AGE: u64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: u64,
    pub username: String,
    pub user_id: UserId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: UserId,
    pub name: String,
    pub balance: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub users: Vec<AdminUser>,
}

/// Absolute balances to write, keyed by user id. Negative values are stored as 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUpdateRequest {
    pub password: String,
    pub updates: BTreeMap<UserId, i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUpdateResponse {
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerRequest {
    pub wager: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessRequest {
    pub guess: Guess,
}

/// Session after an action. `balance` is omitted when it could not be read
/// back after the action was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResponse {
    pub session: GameSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessResponse {
    pub outcome: RoundResult,
    pub session: GameSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForfeitResponse {
    pub winnings: u64,
    pub session: GameSession,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
