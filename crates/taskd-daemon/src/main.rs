use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use taskd_core::config::TaskdConfig;
use taskd_runner::ScriptRunner;
use taskd_scheduler::{JobRegistry, SchedulerSettings};
use taskd_store::TaskStore;

/// Script task scheduler daemon.
#[derive(Debug, Parser)]
#[command(name = "taskd", version, about)]
struct Cli {
    /// Path to taskd.toml (default: ~/.taskd/taskd.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskd=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = TaskdConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TaskdConfig::default()
    });

    // Open the SQLite database — the one irrecoverable startup dependency.
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    let store = TaskStore::new(db)?;
    let runner = Arc::new(ScriptRunner::new(&config.runner));
    let settings = SchedulerSettings::from_config(&config.scheduler)?;
    info!(
        timezone = %config.scheduler.timezone,
        workers = settings.worker_pool_size,
        "scheduler configured"
    );

    let registry = JobRegistry::new(store, runner, settings);
    registry.start()?;

    // Sole reconciliation between persisted tasks and live timers: rebuild
    // every active task's job from its stored record.
    let summary = registry.reload_all()?;
    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            "some tasks could not be scheduled; they remain saved but inert"
        );
    }

    let status = registry.scheduler_status();
    info!(
        jobs = status.job_count,
        next_run = ?status.next_run_time,
        "taskd is running — press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    registry.shutdown().await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), "could not create database directory: {e}");
            }
        }
    }
}
