//! vpo-daemon - Library Orchestrator Daemon
//!
//! Startup sequence: load config, open the catalog database (schema +
//! migrations), probe external tool availability, then spawn the worker
//! pool and the supervisor. Ctrl-C triggers a cooperative shutdown:
//! workers finish their checkpoints and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vpo_common::config::DaemonConfig;
use vpo_common::db;
use vpo_common::events::EventBus;
use vpo_daemon::plugin::PluginRegistry;
use vpo_daemon::queue::supervisor::Supervisor;
use vpo_daemon::queue::worker::Worker;
use vpo_daemon::tools::ToolAvailability;

#[derive(Debug, Parser)]
#[command(name = "vpo-daemon", about = "Video policy orchestrator daemon")]
struct Args {
    /// Path to the daemon configuration file.
    #[arg(short, long, default_value = "vpo.toml")]
    config: PathBuf,

    /// Override the configured worker count.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Tracing filter (overrides config and RUST_LOG).
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load_or_default(&args.config)?;
    if let Some(workers) = args.workers {
        config.worker_count = workers.max(1);
    }

    let filter = args
        .log
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| config.log_filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    info!("Starting vpo-daemon");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());
    info!("Workers: {}", config.worker_count);

    let pool = db::init_database(&config.database_path).await?;

    let tools = Arc::new(ToolAvailability::detect());
    if !tools.has("ffprobe") {
        warn!("ffprobe not found; scan and process jobs will fail until installed");
    }

    let config = Arc::new(config);
    let plugins = Arc::new(PluginRegistry::new());
    let events = EventBus::new(256);
    let shutdown = CancellationToken::new();

    let mut tasks = tokio::task::JoinSet::new();

    for worker_id in 0..config.worker_count {
        let worker = Worker {
            id: worker_id,
            pool: pool.clone(),
            config: Arc::clone(&config),
            tools: Arc::clone(&tools),
            plugins: Arc::clone(&plugins),
            events: events.clone(),
            shutdown: shutdown.clone(),
        };
        tasks.spawn(worker.run());
    }

    let supervisor = Supervisor {
        pool: pool.clone(),
        config: Arc::clone(&config),
        shutdown: shutdown.clone(),
    };
    tasks.spawn(supervisor.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping workers");
    shutdown.cancel();

    while tasks.join_next().await.is_some() {}
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
