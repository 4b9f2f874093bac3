mod bot;
mod config;
mod error;
mod market;
mod model;
mod monitor;
mod notifier;
mod registry;
mod signal;
mod telegram;
#[cfg(test)]
mod testing;
mod transport;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bot::Dispatcher;
use config::AppConfig;
use market::MarketData;
use market::mexc::MexcClient;
use model::Command;
use monitor::Pacing;
use notifier::Notifier;
use notifier::terminal::TerminalNotifier;
use registry::TaskRegistry;
use signal::{EvaluatorSettings, SignalEvaluator};
use telegram::TelegramBot;
use transport::CommandSource;
use transport::stdin::StdinCommands;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("market client error")]
    Market,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "price-alert-bot", about = "Per-chat price movement alerts for MEXC markets")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Market data ───────────────────────────────────────────────────────────
    let market: Arc<dyn MarketData> =
        Arc::new(MexcClient::new(&config.market).change_context(AppError::Market)?);

    // ── Chat transport ────────────────────────────────────────────────────────
    let (notifier, source) = build_transport(&config)?;

    // ── Registry ──────────────────────────────────────────────────────────────
    let settings = EvaluatorSettings::from_config(&config);
    let evaluator = Arc::new(SignalEvaluator::new(
        market,
        Arc::clone(&notifier),
        settings,
    ));
    let shutdown = CancellationToken::new();
    let registry = Arc::new(TaskRegistry::new(
        evaluator,
        Pacing::from_config(&config.monitor),
        shutdown.clone(),
    ));

    // ── Command feed ──────────────────────────────────────────────────────────
    let (command_tx, command_rx) = mpsc::channel::<Command>(256);
    let feed_cancel = shutdown.clone();
    let feed_handle = tokio::spawn(async move {
        if let Err(e) = source.subscribe_commands(command_tx, feed_cancel).await {
            tracing::error!(error = ?e, "command feed failed");
        }
    });

    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        notifier,
        &settings,
        &config.market.stable_asset,
    );
    let dispatch_handle = tokio::spawn(async move { dispatcher.run(command_rx).await });

    info!(
        stable_asset = %config.market.stable_asset,
        threshold = settings.threshold,
        window_minutes = settings.window_minutes(),
        "bot started, waiting for commands"
    );

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    shutdown.cancel();
    registry.shutdown().await;

    for handle in [feed_handle, dispatch_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Telegram when enabled, otherwise log output plus commands on stdin.
fn build_transport(
    config: &AppConfig,
) -> Result<(Arc<dyn Notifier>, Arc<dyn CommandSource>), Report<AppError>> {
    if !config.telegram.enabled {
        info!("telegram disabled, reading commands from stdin");
        let notifier: Arc<dyn Notifier> = Arc::new(TerminalNotifier);
        let source: Arc<dyn CommandSource> = Arc::new(StdinCommands);
        return Ok((notifier, source));
    }

    let bot = TelegramBot::new(&config.telegram).ok_or_else(|| {
        Report::new(AppError::Config).attach("telegram enabled but no token configured")
    })?;
    let bot = Arc::new(bot);
    let notifier: Arc<dyn Notifier> = bot.clone();
    let source: Arc<dyn CommandSource> = bot;
    Ok((notifier, source))
}
