//! Calendar definition: which day unlocks when, for whom, with what content.
//!
//! Built once from the `[calendar]` section of the settings file and
//! immutable afterwards. Components share it through an `Arc` without
//! locking; reconfiguring means loading a new [`CalendarDefinition`].

mod payload;

pub use payload::{Payload, PayloadPart};

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ConfigError;
use crate::storage::config::{CalendarConfig, RawRequester};

/// Platform-assigned identity of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub i64);

impl RequesterId {
    /// Parse the textual form: an optional `-` followed by ASCII digits.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse().ok().map(RequesterId)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Daily window, inclusive on both ends, in which doors may be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub start_hour: u32,
    pub stop_hour: u32,
}

impl OpeningHours {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        (self.start_hour..=self.stop_hour).contains(&at.hour())
    }
}

/// One day of the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub day: u32,
    pub unlock_date: NaiveDate,
    pub payload: Payload,
    pub authorized: BTreeSet<RequesterId>,
}

impl CalendarEntry {
    pub fn is_authorized(&self, requester: RequesterId) -> bool {
        self.authorized.contains(&requester)
    }
}

/// The loaded calendar: days `1..=N`, each present exactly once.
#[derive(Debug, Clone)]
pub struct CalendarDefinition {
    entries: Vec<CalendarEntry>,
    utc_offset: FixedOffset,
    opening_hours: Option<OpeningHours>,
}

impl CalendarDefinition {
    /// Build and fully validate the calendar.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; nothing is partially loaded.
    pub fn load(config: &CalendarConfig) -> Result<Self, ConfigError> {
        let days = config.days;
        if days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "calendar.days".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(1..=12).contains(&config.month) {
            return Err(ConfigError::InvalidValue {
                key: "calendar.month".into(),
                message: format!("{} is not a month", config.month),
            });
        }
        let utc_offset: FixedOffset =
            config
                .utc_offset
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "calendar.utc_offset".into(),
                    message: format!("'{}' is not an offset like +01:00", config.utc_offset),
                })?;
        if let Some(hours) = config.opening_hours {
            if hours.start_hour > hours.stop_hour || hours.stop_hour > 23 {
                return Err(ConfigError::InvalidValue {
                    key: "calendar.opening_hours".into(),
                    message: format!(
                        "{}..={} is not a window within 0..=23",
                        hours.start_hour, hours.stop_hour
                    ),
                });
            }
        }

        let default_requesters = config
            .requesters
            .iter()
            .map(|raw| parse_requester("calendar.requesters", raw))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut by_day: BTreeMap<u32, CalendarEntry> = BTreeMap::new();
        for raw in &config.day {
            let day = raw.day;
            if day == 0 || day > days {
                return Err(ConfigError::DayOutOfRange { day, days });
            }
            if by_day.contains_key(&day) {
                return Err(ConfigError::DuplicateDay { day });
            }

            let payload = raw
                .payload
                .as_ref()
                .map(|p| Payload::from_lines(p.lines()))
                .filter(|p| !p.is_empty())
                .ok_or(ConfigError::MissingPayload { day })?;

            let unlock_date = match &raw.unlock {
                Some(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|e| {
                    ConfigError::InvalidValue {
                        key: format!("calendar.day[{day}].unlock"),
                        message: format!("'{text}': {e}"),
                    }
                })?,
                None => default_unlock_date(config, day)?,
            };

            let authorized = match &raw.requesters {
                Some(list) => list
                    .iter()
                    .map(|r| parse_requester(&format!("calendar.day[{day}].requesters"), r))
                    .collect::<Result<BTreeSet<_>, _>>()?,
                None => default_requesters.clone(),
            };
            if authorized.is_empty() {
                return Err(ConfigError::NoRequesters { day });
            }

            by_day.insert(
                day,
                CalendarEntry {
                    day,
                    unlock_date,
                    payload,
                    authorized,
                },
            );
        }

        if let Some(day) = (1..=days).find(|d| !by_day.contains_key(d)) {
            return Err(ConfigError::MissingDay { day, days });
        }

        Ok(Self {
            entries: by_day.into_values().collect(),
            utc_offset,
            opening_hours: config.opening_hours,
        })
    }

    /// Entry for `day`, or `None` if the calendar has no such slot.
    pub fn lookup(&self, day: u32) -> Option<&CalendarEntry> {
        let index = usize::try_from(day).ok()?.checked_sub(1)?;
        self.entries.get(index)
    }

    /// Number of days (N).
    pub fn days(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn entries(&self) -> &[CalendarEntry] {
        &self.entries
    }

    /// The first day whose unlock date is `date`.
    pub fn unlocking_on(&self, date: NaiveDate) -> Option<&CalendarEntry> {
        self.entries.iter().find(|e| e.unlock_date == date)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn opening_hours(&self) -> Option<OpeningHours> {
        self.opening_hours
    }

    /// Calendar wall-clock time for a UTC instant.
    pub fn local_time(&self, at: chrono::DateTime<chrono::Utc>) -> NaiveDateTime {
        at.with_timezone(&self.utc_offset).naive_local()
    }
}

fn default_unlock_date(config: &CalendarConfig, day: u32) -> Result<NaiveDate, ConfigError> {
    let year = config
        .year
        .ok_or_else(|| ConfigError::MissingKey(format!("calendar.day[{day}].unlock or calendar.year")))?;
    NaiveDate::from_ymd_opt(year, config.month, day).ok_or_else(|| ConfigError::InvalidValue {
        key: format!("calendar.day[{day}].unlock"),
        message: format!("{year}-{:02}-{day:02} is not a date", config.month),
    })
}

fn parse_requester(key: &str, raw: &RawRequester) -> Result<RequesterId, ConfigError> {
    match raw {
        RawRequester::Id(id) => Ok(RequesterId(*id)),
        RawRequester::Text(text) => {
            RequesterId::parse(text).ok_or_else(|| ConfigError::InvalidRequester {
                key: key.to_string(),
                raw: text.clone(),
            })
        }
    }
}
