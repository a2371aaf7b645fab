//! logtaild - chain log ingestion daemon
//!
//! Polls the node, dispatches decoded events of the configured contracts to
//! their receivers and repairs reorgs from the block backup window.

use anyhow::{Context, Result};
use clap::Parser;
use logtail::alert::LogAlerter;
use logtail::config::load_config;
use logtail::daemon::{Daemon, RunOutcome};
use logtail::dispatcher::{CapabilityRegistry, EventDispatcher};
use logtail::engine::{EngineSettings, IngestionEngine};
use logtail::receivers::LogReceiver;
use logtail::rpc::RpcClient;
use logtail::store::RocksEventStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Chain log ingestion daemon
#[derive(Parser)]
#[command(name = "logtaild")]
#[command(about = "Ingest contract events from an Ethereum node with reorg repair")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "logtail.json")]
    config: PathBuf,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./logtail_db")]
    db_path: PathBuf,

    /// RPC endpoint URL, overrides the configuration file
    #[arg(short, long)]
    rpc_url: Option<String>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    if let Some(url) = args.rpc_url {
        config.rpc.url = url;
    }

    info!("Starting logtail daemon");
    info!("RPC URL: {}", config.rpc.url);
    info!("Database: {:?}", args.db_path);
    info!("Watching {} contracts", config.contracts.len());

    let rpc = RpcClient::new(config.rpc.url.clone())
        .with_timeouts(config.rpc.request_timeout(), config.rpc.log_query_timeout())
        .with_concurrency(config.prefetch_concurrency);

    let store = RocksEventStore::open(&args.db_path)
        .with_context(|| format!("Failed to open database at {:?}", args.db_path))?;

    let mut registry = CapabilityRegistry::new();
    registry.register_receiver("log", Arc::new(LogReceiver));
    let dispatcher = EventDispatcher::new(&config.contracts, &registry)?;

    let engine = IngestionEngine::new(
        Arc::new(rpc),
        Arc::new(store),
        dispatcher,
        EngineSettings::from(&config),
    );
    let daemon = Daemon::new(engine, Arc::new(LogAlerter), config.lock_stale_after_secs);

    if args.once {
        daemon.recover_stale_lock()?;
        let outcome = daemon.run_once().await?;
        info!("Pass finished: {:?}", outcome);
        if let RunOutcome::Failed { error, .. } = outcome {
            return Err(error.into());
        }
        return Ok(());
    }

    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    tokio::select! {
        result = run_loop(&daemon, poll_interval) => {
            result.context("Daemon error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    info!("Daemon stopped");
    Ok(())
}

async fn run_loop(daemon: &Daemon<RpcClient, RocksEventStore>, poll_interval: Duration) -> Result<()> {
    loop {
        daemon.recover_stale_lock()?;
        match daemon.run_once().await? {
            RunOutcome::Completed(report) => {
                if report.range.is_none() {
                    info!("Up to date at block {}", report.remote_tip);
                }
            }
            RunOutcome::LockHeld => {}
            RunOutcome::Halted => warn!("Daemon halted; run `logtailctl resume` or `logtailctl resync`"),
            RunOutcome::Failed { error, halted } => {
                if halted {
                    error!("Pass failed, daemon halted: {}", error);
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}
