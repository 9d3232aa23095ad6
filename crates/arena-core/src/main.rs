//! arena: run a trading agent competition.
//!
//! Usage:
//!   arena [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>         Config file path (default: config/arena.toml)
//!   -s, --symbol <SYMBOL>       Trading symbol (overrides config)
//!   -r, --rounds <N>            Maximum rounds (overrides config)
//!   -i, --interval <SECS>       Round interval in seconds (overrides config)
//!   --replay <CSV>              Replay prices from a timestamp,price CSV
//!   --seed <SEED>               Random walk seed when not replaying
//!   --resume <SESSION_ID>       Resume a session from its latest checkpoint

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal_macros::dec;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use arena_common::SessionStatus;
use arena_core::arena::ArenaBuilder;
use arena_core::checkpoint::FileCheckpointStore;
use arena_core::config::ArenaConfig;
use arena_core::events::{FanoutSink, LogEventSink};
use arena_core::export::ResultsExporter;
use arena_core::market::{MarketSnapshotProvider, RandomWalkProvider, ReplayProvider};

/// CLI arguments for arena.
#[derive(Parser, Debug)]
#[command(name = "arena")]
#[command(about = "Round-based competition between paper-trading agents")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/arena.toml")]
    config: PathBuf,

    /// Trading symbol (overrides config file)
    #[arg(short, long)]
    symbol: Option<String>,

    /// Maximum number of rounds (overrides config file)
    #[arg(short, long)]
    rounds: Option<u64>,

    /// Round interval in seconds (overrides config file)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Replay prices from a CSV file with `timestamp,price` rows
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Seed for the random walk price source
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Resume the given session from its latest checkpoint
    #[arg(long)]
    resume: Option<Uuid>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(status) if status != SessionStatus::Failed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<SessionStatus> {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        ArenaConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        ArenaConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.symbol.clone(), args.rounds, args.interval);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    if !config_found {
        warn!("Config file not found at {:?}, using defaults", args.config);
    }
    config.validate().context("Configuration validation failed")?;

    info!("Starting arena");
    info!("Symbol: {}", config.session.symbol);
    info!("Round interval: {:?}", config.session.round_interval);
    info!("Participants: {}", config.participants.len());

    let market: Arc<dyn MarketSnapshotProvider> = match &args.replay {
        Some(path) => {
            let provider = ReplayProvider::from_csv(path)
                .with_context(|| format!("Failed to load replay data from {:?}", path))?;
            info!("Replaying {} price points from {:?}", provider.len(), path);
            Arc::new(provider)
        }
        None => {
            info!("Using random walk prices (seed {})", args.seed);
            Arc::new(RandomWalkProvider::new(dec!(50000), 0.002, args.seed))
        }
    };

    let store = Arc::new(FileCheckpointStore::new(
        config.persistence.checkpoint_dir.clone(),
        config.persistence.keep_last,
    ));
    let events = Arc::new(FanoutSink::new().with(Arc::new(LogEventSink)));
    let exporter = ResultsExporter::new(config.persistence.results_dir.clone());

    let builder = ArenaBuilder::new(config)
        .with_market(market)
        .with_store(store)
        .with_events(events)
        .with_exporter(exporter)
        .with_configured_participants()?;

    let arena = match args.resume {
        Some(session_id) => builder.resume_from(session_id).await?,
        None => builder.build()?,
    };
    info!("Session id: {}", arena.session_id());

    let handle = arena.spawn();
    let controller = handle.controller();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!("Shutdown signal handler error: {}", e);
        }
        info!("Requesting stop after the current round...");
        controller.stop();
    });

    let summary = handle.join().await?;

    info!("Session {} ended: {}", summary.session_id, summary.status);
    info!("Rounds completed: {}", summary.rounds_completed);
    if let Some(failure) = &summary.failure {
        error!("Failure: {}", failure);
    }
    if let Some(leaderboard) = &summary.leaderboard {
        info!("{:>4}  {:<20}  {:>14}  {:>9}  {:>6}  {:>6}", "Rank", "Participant", "Value", "Return", "Trades", "Errors");
        for entry in &leaderboard.entries {
            info!(
                "{:>4}  {:<20}  {:>14.2}  {:>8.2}%  {:>6}  {:>6}",
                entry.rank,
                entry.participant,
                entry.account_value,
                entry.return_pct,
                entry.trades,
                entry.errors
            );
        }
    }

    Ok(summary.status)
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
