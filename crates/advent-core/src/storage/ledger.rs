//! SQLite-backed unlock ledger.
//!
//! Remembers which (requester, day) pairs have been delivered. A record is
//! written once and never changed. Writes are committed with
//! `synchronous = FULL` before [`Ledger::record`] returns, so an
//! acknowledged unlock survives a crash or restart.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::migrations;
use crate::calendar::RequesterId;
use crate::error::LedgerError;

/// How long a statement waits for another connection's lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Proof that a day was delivered to a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub requester: RequesterId,
    pub day: u32,
    pub delivered_at: DateTime<Utc>,
}

/// Days a requester has unlocked, ascending.
///
/// A snapshot: iterating does not touch the ledger and can be repeated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnlockHistory {
    days: Vec<u32>,
}

impl UnlockHistory {
    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, u32>> {
        self.days.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, day: u32) -> bool {
        self.days.binary_search(&day).is_ok()
    }
}

impl<'a> IntoIterator for &'a UnlockHistory {
    type Item = u32;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Durable ledger of unlocks.
///
/// The connection sits behind a mutex so the ledger can be shared as
/// `Arc<Ledger>` between tasks; each call is one short statement.
pub struct Ledger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::QueryFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(|source| LedgerError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        let ledger = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        ledger.migrate()?;
        tracing::debug!(path = %path.display(), "ledger opened");
        Ok(ledger)
    }

    /// Open an in-memory ledger (for tests and dry runs).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    /// File backing this ledger, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<(), LedgerError> {
        migrations::migrate(&self.conn()).map_err(|e| LedgerError::MigrationFailed(e.to_string()))
    }

    /// Whether `day` was already delivered to `requester`.
    pub fn has(&self, requester: RequesterId, day: u32) -> Result<bool, LedgerError> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM unlocks WHERE requester = ?1 AND day = ?2",
                params![requester.0, day],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a delivery. Fails with [`LedgerError::DuplicateUnlock`] if the
    /// pair is already recorded; the existing record is left untouched.
    pub fn record(
        &self,
        requester: RequesterId,
        day: u32,
        delivered_at: DateTime<Utc>,
    ) -> Result<UnlockRecord, LedgerError> {
        let result = self.conn().execute(
            "INSERT INTO unlocks (requester, day, delivered_at) VALUES (?1, ?2, ?3)",
            params![requester.0, day, delivered_at.to_rfc3339()],
        );
        match result {
            Ok(_) => Ok(UnlockRecord {
                requester,
                day,
                delivered_at,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(LedgerError::DuplicateUnlock { requester, day })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The record for a pair, if any.
    pub fn get(&self, requester: RequesterId, day: u32) -> Result<Option<UnlockRecord>, LedgerError> {
        let raw = self
            .conn()
            .query_row(
                "SELECT delivered_at FROM unlocks WHERE requester = ?1 AND day = ?2",
                params![requester.0, day],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(at) => Ok(Some(UnlockRecord {
                requester,
                day,
                delivered_at: parse_timestamp(&at)?,
            })),
            None => Ok(None),
        }
    }

    /// Days unlocked by `requester`, ascending.
    pub fn history(&self, requester: RequesterId) -> Result<UnlockHistory, LedgerError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT day FROM unlocks WHERE requester = ?1 ORDER BY day ASC")?;
        let days = stmt
            .query_map(params![requester.0], |row| row.get::<_, u32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UnlockHistory { days })
    }

    /// Full records for `requester`, ordered by day.
    pub fn records(&self, requester: RequesterId) -> Result<Vec<UnlockRecord>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT day, delivered_at FROM unlocks WHERE requester = ?1 ORDER BY day ASC",
        )?;
        let rows = stmt
            .query_map(params![requester.0], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(day, at)| -> Result<UnlockRecord, LedgerError> {
                Ok(UnlockRecord {
                    requester,
                    day,
                    delivered_at: parse_timestamp(&at)?,
                })
            })
            .collect()
    }

    /// Total number of unlocks across all requesters.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let n = self
            .conn()
            .query_row("SELECT COUNT(*) FROM unlocks", [], |row| row.get::<_, i64>(0))?;
        Ok(n.max(0) as u64)
    }

    /// Change how long a statement waits on a locked database before
    /// failing with [`LedgerError::Locked`].
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), LedgerError> {
        self.conn().busy_timeout(timeout)?;
        Ok(())
    }

    /// Run `f` on tokio's blocking pool. Async code calls the ledger
    /// through this.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| LedgerError::QueryFailed(format!("ledger task failed: {e}")))?
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("delivered_at '{raw}': {e}")))
}
