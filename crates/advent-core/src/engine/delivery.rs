//! Delivery dispatcher.
//!
//! Sends a granted day's payload and then records the unlock. The order is
//! fixed: a failed or timed-out send writes nothing, so a retry starts from
//! a clean state. If the send succeeds but the write fails, the error is
//! returned and the caller's retry may send the payload a second time; a
//! duplicate message is preferred over a lost unlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::calendar::{CalendarDefinition, Payload, RequesterId};
use crate::engine::clock::Clock;
use crate::error::{DeliveryError, LedgerError};
use crate::integrations::{ChatId, Transport};
use crate::storage::{Ledger, UnlockRecord};

/// What a call to [`Dispatcher::deliver`] achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The payload was sent and the unlock recorded.
    Delivered(UnlockRecord),
    /// Someone else recorded this pair first; nothing was sent.
    AlreadyDelivered,
}

type Key = (RequesterId, u32);

/// Per-(requester, day) async locks. Entries are only created for
/// authorized pairs, so the map stays bounded by the calendar size.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: Key) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The only writer of the ledger.
pub struct Dispatcher {
    calendar: Arc<CalendarDefinition>,
    ledger: Arc<Ledger>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    prelude: Payload,
    send_timeout: Duration,
    locks: KeyLocks,
}

impl Dispatcher {
    pub fn new(
        calendar: Arc<CalendarDefinition>,
        ledger: Arc<Ledger>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            calendar,
            ledger,
            transport,
            clock,
            prelude: Payload::default(),
            send_timeout,
            locks: KeyLocks::default(),
        }
    }

    /// Message sent right before each payload, as part of the same delivery.
    pub fn with_prelude(mut self, prelude: Payload) -> Self {
        self.prelude = prelude;
        self
    }

    /// Deliver `day` to `requester` in `chat`. Call only after a
    /// [`Verdict::Granted`](crate::engine::Verdict::Granted).
    ///
    /// # Errors
    /// Every error is safe to retry. `Transport` and `Timeout` leave no
    /// record; `Ledger` means the payload went out but was not recorded.
    pub async fn deliver(
        &self,
        requester: RequesterId,
        chat: ChatId,
        day: u32,
    ) -> Result<DeliveryResult, DeliveryError> {
        let entry = self
            .calendar
            .lookup(day)
            .ok_or(DeliveryError::UnknownDay(day))?;

        let _guard = self.locks.acquire((requester, day)).await;

        let delivered = self
            .ledger
            .run_blocking(move |ledger| ledger.has(requester, day))
            .await
            .map_err(DeliveryError::Ledger)?;
        if delivered {
            tracing::debug!(%requester, day, "already delivered by a concurrent request");
            return Ok(DeliveryResult::AlreadyDelivered);
        }

        let payload = entry.payload.prefixed_by(&self.prelude);
        match tokio::time::timeout(self.send_timeout, self.transport.send_message(chat, &payload))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(%requester, day, transport = self.transport.name(), error = %e, "send failed");
                return Err(DeliveryError::Transport(e));
            }
            Err(_) => {
                tracing::warn!(%requester, day, timeout_secs = self.send_timeout.as_secs(), "send timed out");
                return Err(DeliveryError::Timeout {
                    timeout_secs: self.send_timeout.as_secs(),
                });
            }
        }

        let delivered_at = self.clock.now();
        let recorded = self
            .ledger
            .run_blocking(move |ledger| ledger.record(requester, day, delivered_at))
            .await;
        match recorded {
            Ok(record) => {
                tracing::info!(%requester, day, "day delivered");
                Ok(DeliveryResult::Delivered(record))
            }
            Err(LedgerError::DuplicateUnlock { .. }) => Ok(DeliveryResult::AlreadyDelivered),
            Err(e) => {
                tracing::error!(%requester, day, error = %e, "payload sent but unlock not recorded");
                Err(DeliveryError::Ledger(e))
            }
        }
    }
}
