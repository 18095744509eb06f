//! # Advent Core Library
//!
//! Core logic for a chat bot that works as an advent calendar: each day of
//! the calendar unlocks on its own date and is revealed once to each
//! authorized requester.
//!
//! ## Architecture
//!
//! - **Calendar**: immutable day -> (unlock date, payload, requesters) map,
//!   validated in full when loaded
//! - **Storage**: TOML configuration and a durable SQLite unlock ledger
//! - **Engine**: authorization verdicts, payload delivery with retry, and
//!   the request router that answers every inbound message
//! - **Integrations**: the [`Transport`] trait and its Telegram implementation
//!
//! ## Key Components
//!
//! - [`CalendarDefinition`]: loaded calendar
//! - [`Ledger`]: write-once record of deliveries
//! - [`Authorizer`]: decides a [`Verdict`]
//! - [`Dispatcher`]: sends and records
//! - [`Router`]: inbound entry point

pub mod calendar;
pub mod engine;
pub mod error;
pub mod integrations;
pub mod storage;

pub use calendar::{CalendarDefinition, CalendarEntry, OpeningHours, Payload, PayloadPart, RequesterId};
pub use engine::{
    Authorizer, Clock, DeliveryResult, Dispatcher, FixedClock, Outcome, RetryPolicy, Router,
    SystemClock, Verdict,
};
pub use error::{ConfigError, CoreError, DeliveryError, LedgerError, ParseError, TransportError};
pub use integrations::{ChatId, InboundRequest, TelegramTransport, Transport, UpdatePoller};
pub use storage::{Config, Ledger, UnlockHistory, UnlockRecord};
