//! Shared fixtures for advent-core integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use advent_core::error::TransportError;
use advent_core::{CalendarDefinition, ChatId, Config, InboundRequest, Payload, RequesterId, Transport};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

pub const ALICE: RequesterId = RequesterId(1001);
pub const BOB: RequesterId = RequesterId(2002);

/// Records every payload it is asked to send. The first `failures` sends
/// are rejected with `failure_status` (502 unless set).
pub struct RecordingTransport {
    failures: AtomicUsize,
    failure_status: u16,
    attempts: AtomicUsize,
    sent: Mutex<Vec<(ChatId, Payload)>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::failing(0)
    }
}

impl RecordingTransport {
    pub fn failing(failures: usize) -> Self {
        Self::rejecting(502, failures)
    }

    pub fn rejecting(status: u16, failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            failure_status: status,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Calls to `send_message`, failed or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(ChatId, Payload)> {
        self.sent.lock().unwrap().clone()
    }

    /// Every plain-text part sent so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .flat_map(|(_, payload)| payload.parts().to_vec())
            .filter_map(|part| match part {
                advent_core::PayloadPart::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, chat: ChatId, payload: &Payload) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let decremented = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if decremented {
            return Err(TransportError::Rejected {
                status: self.failure_status,
                description: "rejected by test transport".into(),
            });
        }
        self.sent.lock().unwrap().push((chat, payload.clone()));
        Ok(())
    }
}

/// A 24-day December 2024 calendar for ALICE. Day `n` carries `gift{n}`.
/// `extra` is appended to the `[calendar]` table; `tail` after the days.
pub fn config_with(extra: &str, tail: &str) -> Config {
    let mut toml = format!(
        "[calendar]\ndays = 24\nyear = 2024\nmonth = 12\nrequesters = [{}]\n{extra}\n",
        ALICE.0
    );
    for day in 1..=24 {
        toml.push_str(&format!("[[calendar.day]]\nday = {day}\npayload = 'gift{day}'\n"));
    }
    toml.push_str("[delivery]\nmax_attempts = 3\ninitial_backoff_ms = 1\nmax_backoff_ms = 4\nsend_timeout_secs = 2\n");
    toml.push_str(tail);
    Config::from_toml_str(&toml).unwrap()
}

pub fn config() -> Config {
    config_with("", "")
}

pub fn calendar(config: &Config) -> Arc<CalendarDefinition> {
    Arc::new(CalendarDefinition::load(&config.calendar).unwrap())
}

/// Noon UTC on the given December 2024 day.
pub fn december(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, day, 12, 0, 0).unwrap()
}

pub fn request(requester: RequesterId, text: &str) -> InboundRequest {
    InboundRequest::new(requester, ChatId(requester.0), text)
}
