//! TOML-based bot configuration.
//!
//! Holds:
//! - Bot texts and per-verdict replies
//! - Telegram API settings (the token is passed opaquely to the transport)
//! - The calendar days, unlock dates, payloads and authorized requesters
//! - Ledger location and delivery tuning
//!
//! The default location is `~/.config/advent-bot/config.toml`. Loading only
//! checks the file shape; the calendar itself is validated by
//! [`CalendarDefinition::load`](crate::calendar::CalendarDefinition::load).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::calendar::OpeningHours;
use crate::error::ConfigError;

/// Per-verdict reply templates.
///
/// Placeholders: `{day}`, `{date}`, `{days}`, `{start}`, `{stop}`, `{list}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_not_yet")]
    pub not_yet: String,
    #[serde(default = "default_unauthorized")]
    pub unauthorized: String,
    #[serde(default = "default_unknown_day")]
    pub unknown_day: String,
    #[serde(default = "default_already_opened")]
    pub already_opened: String,
    #[serde(default = "default_outside_hours")]
    pub outside_hours: String,
    #[serde(default = "default_invalid_day")]
    pub invalid_day: String,
    #[serde(default = "default_no_day_today")]
    pub no_day_today: String,
    #[serde(default = "default_delivery_failed")]
    pub delivery_failed: String,
    #[serde(default = "default_history")]
    pub history: String,
    #[serde(default = "default_history_empty")]
    pub history_empty: String,
    #[serde(default = "default_unavailable")]
    pub unavailable: String,
}

/// Bot texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Platform credential. May also come from `ADVENT_BOT_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_start_text")]
    pub start_text: String,
    #[serde(default = "default_help_text")]
    pub help_text: String,
    /// Sent right before a day's payload. Empty disables the prelude.
    #[serde(default = "default_open_text")]
    pub open_text: String,
    #[serde(default = "default_unknown_text")]
    pub unknown_text: String,
    #[serde(default)]
    pub replies: RepliesConfig,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

/// A requester as written in the settings file: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRequester {
    Id(i64),
    Text(String),
}

/// A day's payload as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadConfig {
    One(String),
    Many(Vec<String>),
}

impl PayloadConfig {
    pub fn lines(&self) -> Vec<&str> {
        match self {
            PayloadConfig::One(line) => vec![line.as_str()],
            PayloadConfig::Many(lines) => lines.iter().map(String::as_str).collect(),
        }
    }
}

/// One `[[calendar.day]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayConfig {
    pub day: u32,
    /// `YYYY-MM-DD`; defaults to `calendar.year`-`calendar.month`-`day`.
    #[serde(default)]
    pub unlock: Option<String>,
    #[serde(default)]
    pub payload: Option<PayloadConfig>,
    /// Defaults to `calendar.requesters`.
    #[serde(default)]
    pub requesters: Option<Vec<RawRequester>>,
}

/// The `[calendar]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default = "default_month")]
    pub month: u32,
    /// Offset of the calendar's wall clock, e.g. `+01:00`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default)]
    pub requesters: Vec<RawRequester>,
    #[serde(default)]
    pub opening_hours: Option<OpeningHours>,
    #[serde(default)]
    pub day: Vec<DayConfig>,
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Defaults to `<data_dir>/ledger.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How long a write waits on a locked database file.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Delivery timeout and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

/// Bot configuration.
///
/// Deserialized from TOML, by default at `~/.config/advent-bot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

// Default functions
fn default_start_text() -> String {
    "Welcome to the advent calendar! Send /open to open today's door.".into()
}
fn default_help_text() -> String {
    "Send /open to open today's door, or /open <day> for an earlier one. \
     /opened lists the doors you already opened."
        .into()
}
fn default_open_text() -> String {
    "Here is your door:".into()
}
fn default_unknown_text() -> String {
    "Sorry, I did not understand that. Send /help for the list of commands.".into()
}
fn default_not_yet() -> String {
    "Door {day} is still closed. It opens on {date}.".into()
}
fn default_unauthorized() -> String {
    "Today is not your day.".into()
}
fn default_unknown_day() -> String {
    "There is no door {day} in this calendar.".into()
}
fn default_already_opened() -> String {
    "You already opened door {day}.".into()
}
fn default_outside_hours() -> String {
    "Doors can only be opened between {start}:00 and {stop}:59.".into()
}
fn default_invalid_day() -> String {
    "Please send /open followed by a door number between 1 and {days}.".into()
}
fn default_no_day_today() -> String {
    "No door opens today. Send /open followed by a door number.".into()
}
fn default_delivery_failed() -> String {
    "Door {day} could not be delivered right now. Please try again later.".into()
}
fn default_history() -> String {
    "Doors you opened so far: {list}".into()
}
fn default_history_empty() -> String {
    "You have not opened any door yet.".into()
}
fn default_unavailable() -> String {
    "Something went wrong on my side. Please try again later.".into()
}
fn default_api_base() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_days() -> u32 {
    24
}
fn default_month() -> u32 {
    12
}
fn default_utc_offset() -> String {
    "+00:00".into()
}
fn default_busy_timeout() -> u64 {
    5_000
}
fn default_send_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8_000
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            not_yet: default_not_yet(),
            unauthorized: default_unauthorized(),
            unknown_day: default_unknown_day(),
            already_opened: default_already_opened(),
            outside_hours: default_outside_hours(),
            invalid_day: default_invalid_day(),
            no_day_today: default_no_day_today(),
            delivery_failed: default_delivery_failed(),
            history: default_history(),
            history_empty: default_history_empty(),
            unavailable: default_unavailable(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            start_text: default_start_text(),
            help_text: default_help_text(),
            open_text: default_open_text(),
            unknown_text: default_unknown_text(),
            replies: RepliesConfig::default(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Config {
    /// `~/.config/advent-bot[-dev]/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk. A missing file is an error: there is no sensible
    /// default calendar.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML for this shape, or
    /// if a scalar setting is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "delivery.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.delivery.send_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "delivery.send_timeout_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        url::Url::parse(&self.telegram.api_base).map_err(|e| ConfigError::InvalidValue {
            key: "telegram.api_base".into(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Where the ledger lives: `ledger.path`, or `<data_dir>/ledger.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the data directory
    /// cannot be created.
    pub fn ledger_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.ledger.path {
            Some(path) => Ok(path.clone()),
            None => data_dir()
                .map(|dir| dir.join("ledger.db"))
                .map_err(|e| ConfigError::InvalidValue {
                    key: "ledger.path".into(),
                    message: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [calendar]
        days = 2
        year = 2024
        requesters = [42]

        [[calendar.day]]
        day = 1
        payload = "one"

        [[calendar.day]]
        day = 2
        payload = ["two", "IMAGE:two.jpg"]
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.calendar.month, 12);
        assert_eq!(cfg.calendar.utc_offset, "+00:00");
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
        assert_eq!(cfg.delivery.max_attempts, 3);
        assert_eq!(cfg.ledger.busy_timeout_ms, 5_000);
        assert_eq!(cfg.bot.replies.unauthorized, "Today is not your day.");
        assert!(cfg.bot.token.is_none());
    }

    #[test]
    fn payload_accepts_string_or_list() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.calendar.day[0].payload.as_ref().unwrap().lines(), vec!["one"]);
        assert_eq!(
            cfg.calendar.day[1].payload.as_ref().unwrap().lines(),
            vec!["two", "IMAGE:two.jpg"]
        );
    }

    #[test]
    fn requesters_accept_numbers_and_strings() {
        let cfg = Config::from_toml_str(
            r#"
            [calendar]
            requesters = [1, "2", "@bob"]
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.calendar.requesters,
            vec![
                RawRequester::Id(1),
                RawRequester::Text("2".into()),
                RawRequester::Text("@bob".into()),
            ]
        );
    }

    #[test]
    fn missing_calendar_section_is_rejected() {
        let err = Config::from_toml_str("[bot]\nstart_text = 'hi'\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let content = format!("{MINIMAL}\n[delivery]\nmax_attempts = 0\n");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "delivery.max_attempts"));
    }

    #[test]
    fn explicit_ledger_path_wins() {
        let content = format!("{MINIMAL}\n[ledger]\npath = '/tmp/advent-test.db'\n");
        let cfg = Config::from_toml_str(&content).unwrap();
        assert_eq!(cfg.ledger_path().unwrap(), PathBuf::from("/tmp/advent-test.db"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/advent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed { .. }));
    }
}
