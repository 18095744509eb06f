use std::path::Path;

use advent_core::{CalendarDefinition, PayloadPart};
use serde_json::json;

use super::load_config;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let (config, path) = load_config(config_path)?;
    let calendar = CalendarDefinition::load(&config.calendar)?;

    let entries: Vec<_> = calendar
        .entries()
        .iter()
        .map(|entry| {
            let images = entry
                .payload
                .parts()
                .iter()
                .filter(|part| matches!(part, PayloadPart::Image(_)))
                .count();
            json!({
                "day": entry.day,
                "unlock": entry.unlock_date.format("%Y-%m-%d").to_string(),
                "parts": entry.payload.parts().len(),
                "images": images,
                "requesters": entry.authorized.iter().map(|r| r.0).collect::<Vec<_>>(),
            })
        })
        .collect();

    let summary = json!({
        "config": path.display().to_string(),
        "ledger": config.ledger_path()?.display().to_string(),
        "days": calendar.days(),
        "utc_offset": calendar.utc_offset().to_string(),
        "opening_hours": calendar.opening_hours(),
        "token_configured": config.bot.token.as_deref().is_some_and(|t| !t.trim().is_empty()),
        "entries": entries,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
