pub mod authorize;
pub mod check;
pub mod history;
pub mod run;

use std::path::{Path, PathBuf};
use std::time::Duration;

use advent_core::error::Result;
use advent_core::{ConfigError, Config, Ledger, RequesterId};

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<(Config, PathBuf)> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    let config = Config::load(&path)?;
    Ok((config, path))
}

/// Open the configured ledger with its busy timeout applied.
pub fn open_ledger(config: &Config) -> Result<Ledger> {
    let ledger = Ledger::open(&config.ledger_path()?)?;
    ledger.set_busy_timeout(Duration::from_millis(config.ledger.busy_timeout_ms))?;
    Ok(ledger)
}

pub fn parse_requester(raw: &str) -> Result<RequesterId, ConfigError> {
    RequesterId::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
        key: "requester".into(),
        message: format!("'{raw}' is not a numeric id"),
    })
}
