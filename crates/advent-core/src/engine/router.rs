//! Request router.
//!
//! Consumes inbound chat messages one at a time, turns commands into engine
//! calls and always answers the requester. Commands:
//!
//! - `/start`, `/help`: configured texts
//! - `/open [day]`: authorize, then deliver with retry; without a day number
//!   the day unlocking today is opened
//! - `/opened`: the requester's unlock history
//! - anything else: the configured "unknown" text

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::calendar::{CalendarDefinition, Payload};
use crate::engine::authorize::{Authorizer, Verdict};
use crate::engine::clock::Clock;
use crate::engine::delivery::{DeliveryResult, Dispatcher};
use crate::engine::retry::RetryPolicy;
use crate::error::{DeliveryError, ParseError};
use crate::integrations::{ChatId, InboundRequest, Transport};
use crate::storage::config::{BotConfig, RepliesConfig};
use crate::storage::{Config, Ledger, UnlockHistory, UnlockRecord};

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// Raw day argument, `None` when `/open` came alone.
    Open(Option<String>),
    Opened,
    Unknown,
}

impl Command {
    /// Parse message text. Accepts `/cmd@botname` addressing.
    pub fn parse(text: &str) -> Self {
        let mut words = text.split_whitespace();
        let Some(head) = words.next() else {
            return Command::Unknown;
        };
        let Some(name) = head.strip_prefix('/') else {
            return Command::Unknown;
        };
        let name = name.split('@').next().unwrap_or_default().to_ascii_lowercase();
        match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "open" => {
                let rest: Vec<&str> = words.collect();
                if rest.is_empty() {
                    Command::Open(None)
                } else {
                    Command::Open(Some(rest.join(" ")))
                }
            }
            "opened" => Command::Opened,
            _ => Command::Unknown,
        }
    }
}

/// Parse a day argument. Anything that is not a positive integer is
/// rejected here; whether the calendar has that day is the engine's call.
///
/// # Errors
/// `NotANumber` for anything that is not an integer, `OutOfRange` for
/// integers that cannot be a day number.
pub fn parse_day(raw: &str) -> Result<u32, ParseError> {
    let trimmed = raw.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ParseError::NotANumber(trimmed.to_string()))?;
    u32::try_from(value)
        .ok()
        .filter(|day| *day >= 1)
        .ok_or(ParseError::OutOfRange { day: value })
}

/// What the router did with a request. Every variant produces a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started,
    Help,
    Unrecognized,
    /// Malformed `/open`; the engine was not consulted.
    Rejected(ParseError),
    Denied { day: u32, verdict: Verdict },
    AlreadyDelivered { day: u32 },
    Delivered(UnlockRecord),
    /// Retries exhausted or the ledger could not be read.
    DeliveryFailed { day: u32 },
    History(UnlockHistory),
    /// The ledger could not be read for a non-delivery command.
    Unavailable,
}

/// Inbound entry point. Owns the engine components it drives.
pub struct Router {
    calendar: Arc<CalendarDefinition>,
    ledger: Arc<Ledger>,
    authorizer: Authorizer,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    bot: BotConfig,
    retry: RetryPolicy,
    reply_timeout: Duration,
}

impl Router {
    pub fn new(
        config: &Config,
        calendar: Arc<CalendarDefinition>,
        ledger: Arc<Ledger>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let send_timeout = Duration::from_secs(config.delivery.send_timeout_secs);
        let prelude = if config.bot.open_text.trim().is_empty() {
            Payload::default()
        } else {
            Payload::text(config.bot.open_text.clone())
        };
        let dispatcher = Dispatcher::new(
            calendar.clone(),
            ledger.clone(),
            transport.clone(),
            clock.clone(),
            send_timeout,
        )
        .with_prelude(prelude);

        Self {
            authorizer: Authorizer::new(calendar.clone(), ledger.clone()),
            calendar,
            ledger,
            dispatcher,
            transport,
            clock,
            bot: config.bot.clone(),
            retry: RetryPolicy::from_config(&config.delivery),
            reply_timeout: send_timeout,
        }
    }

    /// Process requests until the channel closes. Requests already queued
    /// when the sender is dropped are still handled.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundRequest>) {
        tracing::info!(days = self.calendar.days(), "router started");
        let mut handled: u64 = 0;
        while let Some(request) = inbound.recv().await {
            self.handle(&request).await;
            handled += 1;
        }
        tracing::info!(handled, "inbound channel closed, router stopped");
    }

    /// Handle one request and send its reply.
    pub async fn handle(&self, request: &InboundRequest) -> Outcome {
        let command = Command::parse(&request.text);
        tracing::info!(
            requester = %request.requester,
            chat = %request.chat,
            name = request.display_name.as_deref().unwrap_or(""),
            ?command,
            "request received"
        );

        let requester = request.requester;
        let outcome = match command {
            Command::Start => Outcome::Started,
            Command::Help => Outcome::Help,
            Command::Unknown => Outcome::Unrecognized,
            Command::Opened => match self
                .ledger
                .run_blocking(move |ledger| ledger.history(requester))
                .await
            {
                Ok(history) => Outcome::History(history),
                Err(e) => {
                    tracing::error!(%requester, error = %e, "history lookup failed");
                    Outcome::Unavailable
                }
            },
            Command::Open(raw) => self.open(request, raw.as_deref()).await,
        };

        if let Some(reply) = self.reply_for(&outcome) {
            self.reply(request.chat, &reply).await;
        }
        tracing::debug!(requester = %request.requester, ?outcome, "request handled");
        outcome
    }

    async fn open(&self, request: &InboundRequest, raw: Option<&str>) -> Outcome {
        let now = self.calendar.local_time(self.clock.now());
        let day = match raw {
            Some(raw) => parse_day(raw),
            None => self
                .calendar
                .unlocking_on(now.date())
                .map(|entry| entry.day)
                .ok_or(ParseError::NoDayToday),
        };
        let day = match day {
            Ok(day) => day,
            Err(e) => {
                tracing::info!(requester = %request.requester, error = %e, "rejected open request");
                return Outcome::Rejected(e);
            }
        };

        let authorizer = self.authorizer.clone();
        let requester = request.requester;
        let verdict = match self
            .ledger
            .run_blocking(move |_| authorizer.authorize(requester, day, now))
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!(requester = %request.requester, day, error = %e, "ledger read failed");
                return Outcome::DeliveryFailed { day };
            }
        };
        tracing::info!(requester = %request.requester, day, %verdict, "authorization verdict");

        match verdict {
            Verdict::Granted => {}
            Verdict::AlreadyDelivered => return Outcome::AlreadyDelivered { day },
            denied => return Outcome::Denied { day, verdict: denied },
        }

        let result = self
            .retry
            .run(DeliveryError::is_retryable, |_| {
                self.dispatcher.deliver(request.requester, request.chat, day)
            })
            .await;
        match result {
            Ok(DeliveryResult::Delivered(record)) => Outcome::Delivered(record),
            Ok(DeliveryResult::AlreadyDelivered) => Outcome::AlreadyDelivered { day },
            Err(e) => {
                tracing::error!(
                    requester = %request.requester,
                    day,
                    error = %e,
                    retryable = e.is_retryable(),
                    "delivery failed"
                );
                Outcome::DeliveryFailed { day }
            }
        }
    }

    /// Reply text for an outcome. A delivery is its own reply.
    pub fn reply_for(&self, outcome: &Outcome) -> Option<String> {
        let replies: &RepliesConfig = &self.bot.replies;
        let days = self.calendar.days().to_string();
        let text = match outcome {
            Outcome::Started => self.bot.start_text.clone(),
            Outcome::Help => self.bot.help_text.clone(),
            Outcome::Unrecognized => self.bot.unknown_text.clone(),
            Outcome::Rejected(ParseError::NoDayToday) => replies.no_day_today.clone(),
            Outcome::Rejected(_) => render(&replies.invalid_day, &[("days", days)]),
            Outcome::Denied { day, verdict } => {
                let day_text = day.to_string();
                match verdict {
                    Verdict::DeniedNotYetUnlocked => {
                        let date = self
                            .calendar
                            .lookup(*day)
                            .map(|e| e.unlock_date.format("%Y-%m-%d").to_string())
                            .unwrap_or_default();
                        render(&replies.not_yet, &[("day", day_text), ("date", date)])
                    }
                    Verdict::DeniedUnauthorizedRequester => {
                        render(&replies.unauthorized, &[("day", day_text)])
                    }
                    Verdict::DeniedUnknownDay => render(&replies.unknown_day, &[("day", day_text)]),
                    Verdict::DeniedOutsideOpeningHours => {
                        let (start, stop) = self
                            .calendar
                            .opening_hours()
                            .map(|h| (h.start_hour, h.stop_hour))
                            .unwrap_or((0, 23));
                        render(
                            &replies.outside_hours,
                            &[("start", start.to_string()), ("stop", stop.to_string())],
                        )
                    }
                    Verdict::AlreadyDelivered => {
                        render(&replies.already_opened, &[("day", day_text)])
                    }
                    Verdict::Granted => return None,
                }
            }
            Outcome::AlreadyDelivered { day } => {
                render(&replies.already_opened, &[("day", day.to_string())])
            }
            Outcome::Delivered(_) => return None,
            Outcome::DeliveryFailed { day } => {
                render(&replies.delivery_failed, &[("day", day.to_string())])
            }
            Outcome::Unavailable => replies.unavailable.clone(),
            Outcome::History(history) if history.is_empty() => replies.history_empty.clone(),
            Outcome::History(history) => {
                let list = history
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                render(&replies.history, &[("list", list)])
            }
        };
        Some(text)
    }

    async fn reply(&self, chat: ChatId, text: &str) {
        let payload = Payload::text(text);
        match tokio::time::timeout(self.reply_timeout, self.transport.send_message(chat, &payload))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(%chat, error = %e, "reply failed"),
            Err(_) => tracing::warn!(%chat, "reply timed out"),
        }
    }
}

/// Replace `{name}` placeholders.
fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/open"), Command::Open(None));
        assert_eq!(Command::parse("/open 5"), Command::Open(Some("5".into())));
        assert_eq!(Command::parse("/open@AdventBot 12"), Command::Open(Some("12".into())));
        assert_eq!(Command::parse("/OPEN thirty"), Command::Open(Some("thirty".into())));
        assert_eq!(Command::parse("/opened"), Command::Opened);
        assert_eq!(Command::parse("hello"), Command::Unknown);
        assert_eq!(Command::parse("/close 3"), Command::Unknown);
        assert_eq!(Command::parse("   "), Command::Unknown);
    }

    #[test]
    fn parses_days() {
        assert_eq!(parse_day("5"), Ok(5));
        assert_eq!(parse_day(" 24 "), Ok(24));
        assert_eq!(parse_day("99"), Ok(99));
        assert_eq!(parse_day("thirty"), Err(ParseError::NotANumber("thirty".into())));
        assert_eq!(parse_day("2.5"), Err(ParseError::NotANumber("2.5".into())));
        assert_eq!(parse_day("0"), Err(ParseError::OutOfRange { day: 0 }));
        assert_eq!(parse_day("-3"), Err(ParseError::OutOfRange { day: -3 }));
        assert_eq!(
            parse_day("99999999999"),
            Err(ParseError::OutOfRange { day: 99_999_999_999 })
        );
    }

    #[test]
    fn renders_placeholders() {
        assert_eq!(
            render("Door {day} opens on {date}.", &[("day", "3".into()), ("date", "2024-12-03".into())]),
            "Door 3 opens on 2024-12-03."
        );
        assert_eq!(render("no placeholders", &[("day", "1".into())]), "no placeholders");
    }
}
