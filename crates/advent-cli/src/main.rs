use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "advent-bot", version, about = "Advent calendar chat bot")]
struct Cli {
    /// Configuration file [default: ~/.config/advent-bot/config.toml]
    #[arg(long, global = true, env = "ADVENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot until interrupted
    Run(commands::run::RunArgs),
    /// Validate the configuration and print the calendar
    Check,
    /// Show the verdict for a request without delivering anything
    Authorize(commands::authorize::AuthorizeArgs),
    /// List the doors a requester has opened
    History {
        /// Requester id
        requester: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(config, args),
        Commands::Check => commands::check::run(config),
        Commands::Authorize(args) => commands::authorize::run(config, args),
        Commands::History { requester } => commands::history::run(config, &requester),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
