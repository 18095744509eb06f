use std::path::{Path, PathBuf};
use std::sync::Arc;

use advent_core::{
    CalendarDefinition, Config, ConfigError, Ledger, Router, SystemClock, TelegramTransport,
    UpdatePoller,
};
use clap::Args;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use super::{load_config, open_ledger};

/// Inbound requests buffered between the poller and the router.
const INBOUND_CAPACITY: usize = 64;

#[derive(Args)]
pub struct RunArgs {
    /// Bot API token; falls back to `bot.token` in the configuration
    #[arg(long, env = "ADVENT_BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

pub fn run(config_path: Option<&Path>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let (config, path) = load_config(config_path)?;
    let calendar = Arc::new(CalendarDefinition::load(&config.calendar)?);
    let token = args
        .token
        .or_else(|| config.bot.token.clone())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingKey("bot.token".into()))?;
    let ledger_path = config.ledger_path()?;
    let ledger = Arc::new(open_ledger(&config)?);
    tracing::info!(
        config = %path.display(),
        ledger = %ledger_path.display(),
        days = calendar.days(),
        "calendar loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, path, calendar, ledger, token))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("advent_core=info,advent_bot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(
    config: Config,
    config_path: PathBuf,
    calendar: Arc<CalendarDefinition>,
    ledger: Arc<Ledger>,
    token: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut transport = TelegramTransport::new(&config.telegram.api_base, &token)?;
    if let Some(dir) = config_path.parent() {
        transport = transport.with_media_root(dir);
    }
    let transport = Arc::new(transport);
    let bot = transport.get_me().await?;
    tracing::info!(%bot, "connected to Telegram");

    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let router = Router::new(
        &config,
        calendar,
        ledger,
        transport.clone(),
        Arc::new(SystemClock),
    );
    let poller = tokio::spawn(
        UpdatePoller::new(transport, config.telegram.poll_timeout_secs).run(tx, shutdown_rx),
    );
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    router.run(rx).await;
    poller.await?;
    tracing::info!("advent bot stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
