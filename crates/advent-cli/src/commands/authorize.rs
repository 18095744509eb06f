use std::path::Path;
use std::sync::Arc;

use advent_core::{Authorizer, CalendarDefinition, ConfigError};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use clap::Args;
use serde_json::json;

use super::{load_config, open_ledger, parse_requester};

#[derive(Args)]
pub struct AuthorizeArgs {
    /// Requester id
    pub requester: String,
    /// Day number
    pub day: u32,
    /// Calendar-local time to evaluate at (YYYY-MM-DD or YYYY-MM-DDTHH:MM), default now
    #[arg(long)]
    pub at: Option<String>,
}

pub fn run(config_path: Option<&Path>, args: AuthorizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let requester = parse_requester(&args.requester)?;
    let (config, _) = load_config(config_path)?;
    let calendar = Arc::new(CalendarDefinition::load(&config.calendar)?);
    let ledger = Arc::new(open_ledger(&config)?);

    let at = match args.at.as_deref() {
        Some(raw) => parse_local_time(raw)?,
        None => calendar.local_time(Utc::now()),
    };
    let verdict = Authorizer::new(calendar, ledger).authorize(requester, args.day, at)?;

    let report = json!({
        "requester": requester,
        "day": args.day,
        "at": at.format("%Y-%m-%dT%H:%M").to_string(),
        "verdict": verdict,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// A bare date means noon.
fn parse_local_time(raw: &str) -> Result<NaiveDateTime, ConfigError> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(12, 0, 0))
        })
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "--at".into(),
            message: format!("'{raw}' is not YYYY-MM-DD or YYYY-MM-DDTHH:MM"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_time() {
        let noon = NaiveDate::from_ymd_opt(2024, 12, 5)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(parse_local_time("2024-12-05").unwrap(), noon);
        assert_eq!(
            parse_local_time("2024-12-05T08:30").unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 5)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap()
        );
        assert!(parse_local_time("tomorrow").is_err());
    }
}
