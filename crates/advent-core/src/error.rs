//! Core error types for advent-core.
//!
//! This module defines the error hierarchy using thiserror. Only
//! [`ConfigError`] is fatal to the process; everything else is recovered by
//! the router and turned into a reply to the requester.

use std::path::PathBuf;
use thiserror::Error;

use crate::calendar::RequesterId;

/// Core error type for advent-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ledger-related errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Delivery-related errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
///
/// Raised while loading the settings file or building the calendar from it.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// A calendar day has no payload
    #[error("Day {day} has no payload")]
    MissingPayload { day: u32 },

    /// A calendar day in 1..=N is not configured at all
    #[error("Day {day} is not configured (calendar has {days} days)")]
    MissingDay { day: u32, days: u32 },

    /// The same day number appears twice
    #[error("Day {day} is configured more than once")]
    DuplicateDay { day: u32 },

    /// A day number outside 1..=N
    #[error("Day {day} is outside the calendar range 1..={days}")]
    DayOutOfRange { day: u32, days: u32 },

    /// A requester entry that is neither an integer nor a numeric string
    #[error("Unrecognized requester '{raw}' in {key}")]
    InvalidRequester { key: String, raw: String },

    /// No authorized requesters for a day after defaults are applied
    #[error("Day {day} has no authorized requesters")]
    NoRequesters { day: u32 },
}

/// Unlock ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Failed to open ledger database
    #[error("Failed to open ledger at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The (requester, day) pair has already been recorded
    #[error("Day {day} was already unlocked for requester {requester}")]
    DuplicateUnlock { requester: RequesterId, day: u32 },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Ledger migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Ledger database is locked")]
    Locked,

    /// A stored row could not be decoded
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Failures reported by a messaging transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP-level failure talking to the platform
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered but refused the request
    #[error("Platform rejected request ({status}): {description}")]
    Rejected { status: u16, description: String },

    /// Reading a local attachment failed
    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid API endpoint configuration
    #[error("Invalid API endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl TransportError {
    /// Whether sending the same request again can succeed. Client errors
    /// (4xx other than 429) and unreadable attachments fail the same way
    /// every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(_) => true,
            TransportError::Rejected { status, .. } => {
                *status == 429 || !(400..500).contains(status)
            }
            TransportError::Attachment { .. } | TransportError::Endpoint(_) => false,
        }
    }
}

/// Delivery failures. None of them leaves a ledger record behind; for
/// `Ledger` the send already happened.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The transport send failed; nothing was recorded
    #[error("Send failed: {0}")]
    Transport(#[from] TransportError),

    /// The transport send did not finish in time; nothing was recorded
    #[error("Send timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The payload was sent but the unlock could not be recorded
    #[error("Payload sent but unlock not recorded: {0}")]
    Ledger(#[source] LedgerError),

    /// The requested day is not part of the calendar
    #[error("Day {0} is not in the calendar")]
    UnknownDay(u32),
}

impl DeliveryError {
    /// Whether the router should try this delivery again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(e) => e.is_retryable(),
            DeliveryError::Timeout { .. } | DeliveryError::Ledger(_) => true,
            DeliveryError::UnknownDay(_) => false,
        }
    }
}

/// Malformed inbound request. Recovered locally with a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The day argument is not a number
    #[error("'{0}' is not a day number")]
    NotANumber(String),

    /// The day argument is an integer that cannot be a day number
    #[error("{day} is not a valid day number")]
    OutOfRange { day: i64 },

    /// No argument was given and no day unlocks today
    #[error("No day unlocks today")]
    NoDayToday,
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked
                    || err.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    LedgerError::Locked
                } else {
                    LedgerError::QueryFailed(err.to_string())
                }
            }
            _ => LedgerError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
