pub mod config;
pub mod ledger;
pub mod migrations;

pub use config::Config;
pub use ledger::{Ledger, UnlockHistory, UnlockRecord};

use std::path::PathBuf;

/// Returns `~/.config/advent-bot[-dev]/` based on ADVENT_ENV.
///
/// Set ADVENT_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("ADVENT_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("advent-bot-dev")
    } else {
        base_dir.join("advent-bot")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
