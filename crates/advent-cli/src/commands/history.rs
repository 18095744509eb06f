use std::path::Path;

use super::{load_config, open_ledger, parse_requester};

pub fn run(config_path: Option<&Path>, requester: &str) -> Result<(), Box<dyn std::error::Error>> {
    let requester = parse_requester(requester)?;
    let (config, _) = load_config(config_path)?;
    let ledger = open_ledger(&config)?;

    let records = ledger.records(requester)?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
