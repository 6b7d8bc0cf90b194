//! Drover CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use drover::cli::{commands, Cli, Commands};
use drover::domain::models::{Config, StoreBackend};
use drover::domain::ports::memory_store::MemoryStore;
use drover::domain::ports::planner::{ProgressAnalyzer, TaskPlanner};
use drover::domain::ports::task_store::TaskStore;
use drover::infrastructure::config::ConfigLoader;
use drover::infrastructure::logging;
use drover::infrastructure::memstore::{MemMemoryStore, MemTaskStore};
use drover::infrastructure::planner::AnthropicPlanner;
use drover::infrastructure::sqlite::{create_pool, SqliteMemoryStore, SqliteTaskStore};
use drover::services::{load_objective_file, ObjectiveMode, Orchestrator};

/// How long a signal-initiated shutdown may take before we give up.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _log_guard = logging::init(&config.logging)?;

    let (tasks, memories) = build_stores(&config).await?;

    match cli.command {
        Commands::Run { agents, objective } => {
            run(config, tasks, memories, agents, objective).await
        }
        Commands::Task { command } => commands::handle_task(command, tasks).await,
        Commands::Status => commands::handle_status(tasks).await,
    }
}

async fn build_stores(config: &Config) -> Result<(Arc<dyn TaskStore>, Arc<dyn MemoryStore>)> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let pool = create_pool(&config.store.path)
                .await
                .context("opening task database")?;
            Ok((
                Arc::new(SqliteTaskStore::new(pool.clone())),
                Arc::new(SqliteMemoryStore::new(pool)),
            ))
        }
        StoreBackend::Memory => Ok((
            Arc::new(MemTaskStore::new()),
            Arc::new(MemMemoryStore::new()),
        )),
    }
}

async fn run(
    mut config: Config,
    tasks: Arc<dyn TaskStore>,
    memories: Arc<dyn MemoryStore>,
    agents: Option<usize>,
    objective_path: Option<PathBuf>,
) -> Result<()> {
    if let Some(count) = agents {
        config.agents.count = count;
        config.agents.roster.clear();
    }

    let objective_mode = match objective_path {
        Some(path) => {
            let objective = load_objective_file(&path)
                .with_context(|| format!("loading objective from {}", path.display()))?;
            let planner = Arc::new(AnthropicPlanner::new(config.planner.clone(), None)?);
            Some(ObjectiveMode {
                objective,
                planner: Arc::clone(&planner) as Arc<dyn TaskPlanner>,
                analyzer: planner as Arc<dyn ProgressAnalyzer>,
            })
        }
        None => None,
    };

    let orchestrator = Orchestrator::new(config, tasks, memories, objective_mode);
    orchestrator.start().await.context("orchestrator start")?;

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        end = orchestrator.wait_for_end() => {
            info!(end_state = end.as_str(), "run ended");
        }
        _ = sigint.recv() => info!("interrupt received, shutting down"),
        _ = sigterm.recv() => info!("terminate received, shutting down"),
    }

    // Graceful shutdown: a second signal forces an immediate (but still
    // clean, exit 0) departure; exceeding the deadline exits 1.
    let shutdown = orchestrator.stop();
    tokio::pin!(shutdown);
    let code = tokio::select! {
        () = &mut shutdown => 0,
        _ = sigint.recv() => {
            info!("second signal, exiting immediately");
            0
        }
        _ = sigterm.recv() => {
            info!("second signal, exiting immediately");
            0
        }
        () = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
            error!("shutdown timed out");
            1
        }
    };
    std::process::exit(code);
}
