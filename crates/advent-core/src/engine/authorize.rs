//! Authorization engine.
//!
//! Decides whether a requester may open a day right now. Checks run in a
//! fixed order and stop at the first denial:
//!
//! 1. unknown day
//! 2. requester not authorized for the day
//! 3. unlock date not reached
//! 4. outside opening hours (when configured)
//! 5. already delivered
//!
//! Authorization comes before the date check so that outsiders get the same
//! answer on every date and learn nothing about the calendar.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::calendar::{CalendarDefinition, RequesterId};
use crate::error::LedgerError;
use crate::storage::Ledger;

/// Outcome of an authorization check. Denials are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Granted,
    DeniedNotYetUnlocked,
    DeniedUnauthorizedRequester,
    DeniedUnknownDay,
    DeniedOutsideOpeningHours,
    /// The day was opened before; nothing new is sent.
    AlreadyDelivered,
}

impl Verdict {
    pub fn is_granted(self) -> bool {
        self == Verdict::Granted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Granted => "granted",
            Verdict::DeniedNotYetUnlocked => "denied_not_yet_unlocked",
            Verdict::DeniedUnauthorizedRequester => "denied_unauthorized_requester",
            Verdict::DeniedUnknownDay => "denied_unknown_day",
            Verdict::DeniedOutsideOpeningHours => "denied_outside_opening_hours",
            Verdict::AlreadyDelivered => "already_delivered",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the calendar and the ledger; never writes.
#[derive(Clone)]
pub struct Authorizer {
    calendar: Arc<CalendarDefinition>,
    ledger: Arc<Ledger>,
}

impl Authorizer {
    pub fn new(calendar: Arc<CalendarDefinition>, ledger: Arc<Ledger>) -> Self {
        Self { calendar, ledger }
    }

    /// `now` is the calendar's local wall-clock time.
    ///
    /// # Errors
    /// Only a ledger read failure is an error; it must not be read as a grant.
    pub fn authorize(
        &self,
        requester: RequesterId,
        day: u32,
        now: NaiveDateTime,
    ) -> Result<Verdict, LedgerError> {
        let Some(entry) = self.calendar.lookup(day) else {
            return Ok(Verdict::DeniedUnknownDay);
        };
        if !entry.is_authorized(requester) {
            return Ok(Verdict::DeniedUnauthorizedRequester);
        }
        if now.date() < entry.unlock_date {
            return Ok(Verdict::DeniedNotYetUnlocked);
        }
        if let Some(hours) = self.calendar.opening_hours() {
            if !hours.contains(now) {
                return Ok(Verdict::DeniedOutsideOpeningHours);
            }
        }
        if self.ledger.has(requester, day)? {
            return Ok(Verdict::AlreadyDelivered);
        }
        Ok(Verdict::Granted)
    }
}
