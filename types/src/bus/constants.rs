/// Balance granted to an identity on first contact.
pub const STARTING_BALANCE: u64 = 300;

/// Smallest stake accepted when starting a game.
pub const MIN_WAGER: u64 = 10;

/// Maximum display name length.
pub const MAX_NAME_LENGTH: usize = 32;

/// Maximum length of an opaque user id.
pub const MAX_ID_LENGTH: usize = 64;

/// Largest bet a session can grow to. Payouts are issued as signed deltas.
pub const MAX_BET: u64 = i64::MAX as u64;

/// Where the deck API serves card images.
pub const CARD_IMAGE_BASE: &str = "https://deckofcardsapi.com/static/img";
