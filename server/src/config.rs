use busride_types::bus::{MIN_WAGER, STARTING_BALANCE};
use commonware_utils::from_hex_formatted;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Public deck-of-cards API.
pub const DEFAULT_DECK_API: &str = "https://deckofcardsapi.com/";

/// Server configuration, as read from YAML. Every field has a default.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_starting_balance")]
    pub starting_balance: u64,
    #[serde(default = "default_min_wager")]
    pub min_wager: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// SQLite database holding balances. Balances live only in memory when unset.
    #[serde(default)]
    pub database: Option<String>,
    /// Password for the admin routes. The routes reject everything when unset.
    #[serde(default)]
    pub admin_password: Option<String>,

    #[serde(default)]
    pub deck: DeckConfig,

    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u64,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

/// Where decks come from.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum DeckConfig {
    /// Decks shuffled in process. A hex seed makes every run deal the same cards.
    Local {
        #[serde(default)]
        seed: Option<String>,
    },
    /// Decks served by a deck-of-cards API.
    Remote {
        #[serde(default = "default_deck_api")]
        url: String,
    },
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self::Local { seed: None }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be hex: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("{field} must be {expected} bytes (got {actual})")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} is out of range (got {value})")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("admin_password must not be empty")]
    EmptyPassword,
}

/// Deck source after validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeckSource {
    Local(Option<[u8; 32]>),
    Remote(Url),
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub port: u16,
    pub log_level: Level,
    pub log_json: bool,

    pub starting_balance: u64,
    pub engine: busride_execution::Config,

    pub database: Option<PathBuf>,
    pub admin_password: Option<String>,

    pub deck: DeckSource,

    /// Interval at which one request is replenished per client.
    pub rate_limit_period: Duration,
    pub rate_limit_burst: u32,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_starting_balance() -> u64 {
    STARTING_BALANCE
}

fn default_min_wager() -> u64 {
    MIN_WAGER
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_deck_api() -> String {
    DEFAULT_DECK_API.to_string()
}

fn default_rate_limit_per_second() -> u64 {
    50
}

fn default_rate_limit_burst() -> u32 {
    100
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(value)
}

fn parse_seed(value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = from_hex_formatted(value).ok_or(ConfigError::InvalidHex {
        field: "deck.seed",
        value: value.to_string(),
    })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ConfigError::InvalidLength {
        field: "deck.seed",
        expected: 32,
        actual,
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            starting_balance: default_starting_balance(),
            min_wager: default_min_wager(),
            call_timeout_ms: default_call_timeout_ms(),
            database: None,
            admin_password: None,
            deck: DeckConfig::default(),
            rate_limit_per_second: default_rate_limit_per_second(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let min_wager = non_zero("min_wager", self.min_wager)?;
        let call_timeout_ms = non_zero("call_timeout_ms", self.call_timeout_ms)?;
        let per_second = non_zero("rate_limit_per_second", self.rate_limit_per_second)?;
        if per_second > 1_000_000_000 {
            return Err(ConfigError::OutOfRange {
                field: "rate_limit_per_second",
                value: per_second,
            });
        }
        non_zero("rate_limit_burst", self.rate_limit_burst as u64)?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        if self.admin_password.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyPassword);
        }

        let deck = match self.deck {
            DeckConfig::Local { seed } => {
                DeckSource::Local(seed.as_deref().map(parse_seed).transpose()?)
            }
            DeckConfig::Remote { url } => {
                let parsed = Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
                    field: "deck.url",
                    value: url.clone(),
                    source,
                })?;
                DeckSource::Remote(parsed)
            }
        };

        Ok(ValidatedConfig {
            port: self.port,
            log_level,
            log_json: self.log_json,
            starting_balance: self.starting_balance,
            engine: busride_execution::Config {
                min_wager,
                call_timeout: Duration::from_millis(call_timeout_ms),
            },
            database: self.database.map(PathBuf::from),
            admin_password: self.admin_password,
            deck,
            rate_limit_period: Duration::from_nanos(1_000_000_000 / per_second),
            rate_limit_burst: self.rate_limit_burst,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(validated.port, 8080);
        assert_eq!(validated.log_level, Level::INFO);
        assert_eq!(validated.starting_balance, 300);
        assert_eq!(validated.engine, busride_execution::Config::default());
        assert_eq!(validated.deck, DeckSource::Local(None));
        assert_eq!(validated.database, None);
        assert_eq!(validated.admin_password, None);
        assert_eq!(validated.rate_limit_period, Duration::from_millis(20));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
port: 3000
log_level: debug
log_json: true
starting_balance: 500
min_wager: 25
call_timeout_ms: 250
database: /var/lib/busride/ledger.db
admin_password: hunter2
deck:
  provider: local
  seed: "0x0101010101010101010101010101010101010101010101010101010101010101"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(validated.port, 3000);
        assert_eq!(validated.log_level, Level::DEBUG);
        assert!(validated.log_json);
        assert_eq!(validated.engine.min_wager, 25);
        assert_eq!(validated.engine.call_timeout, Duration::from_millis(250));
        assert_eq!(
            validated.database,
            Some(PathBuf::from("/var/lib/busride/ledger.db"))
        );
        assert_eq!(validated.admin_password.as_deref(), Some("hunter2"));
        assert_eq!(validated.deck, DeckSource::Local(Some([1; 32])));
    }

    #[test]
    fn test_remote_deck() {
        let config: Config = serde_yaml::from_str("deck:\n  provider: remote\n").unwrap();
        let validated = config.validate().unwrap();
        assert_eq!(
            validated.deck,
            DeckSource::Remote(Url::parse(DEFAULT_DECK_API).unwrap())
        );

        let config: Config =
            serde_yaml::from_str("deck:\n  provider: remote\n  url: not a url\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("min_wager: 0", "min_wager"),
            ("call_timeout_ms: 0", "call_timeout_ms"),
            ("rate_limit_per_second: 0", "rate_limit_per_second"),
            ("rate_limit_burst: 0", "rate_limit_burst"),
        ];
        for (yaml, expected) in cases {
            let config: Config = serde_yaml::from_str(yaml).unwrap();
            match config.validate() {
                Err(ConfigError::InvalidNonZero { field, .. }) => assert_eq!(field, expected),
                other => panic!("{yaml}: unexpected {other:?}"),
            }
        }

        let config: Config = serde_yaml::from_str("log_level: loud").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let config: Config = serde_yaml::from_str("admin_password: \"\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPassword)));

        let config: Config =
            serde_yaml::from_str("deck:\n  provider: local\n  seed: \"zz\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHex { .. })));

        let config: Config =
            serde_yaml::from_str("deck:\n  provider: local\n  seed: \"0102\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLength { actual: 2, .. })
        ));
    }
}
