//! Job engine CLI
//!
//! `run` starts the worker with a small demo catalog, `list` and `show` print
//! records from the configured store as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use job_engine::kernel::jobs::{
    InMemoryJobStore, JobCatalog, JobError, JobManager, JobWorker, SharedJobStore,
};
use job_engine::kernel::ServiceHost;
use job_engine::{JobEngineConfig, OrphanPolicy};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "job-engine")]
#[command(about = "In-process background job engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker until Ctrl+C
    Run {
        /// Enqueue a catalog job by name at startup (repeatable)
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Stop once the queue is empty instead of waiting for more work
        #[arg(long)]
        exit_when_idle: bool,

        /// Override JOB_ORPHAN_POLICY
        #[arg(long)]
        orphan_policy: Option<OrphanPolicy>,

        /// Override JOB_HEARTBEAT_INTERVAL_SECS
        #[arg(long)]
        heartbeat_secs: Option<u64>,
    },

    /// Print all job records, newest first
    List,

    /// Print one job record
    Show { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut config = JobEngineConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            jobs,
            exit_when_idle,
            orphan_policy,
            heartbeat_secs,
        } => {
            if let Some(policy) = orphan_policy {
                config.orphan_policy = policy;
            }
            if let Some(secs) = heartbeat_secs {
                config.heartbeat_interval = Duration::from_secs(secs);
                config.validate()?;
            }
            cmd_run(config, jobs, exit_when_idle).await
        }
        Commands::List => cmd_list(&config).await,
        Commands::Show { id } => cmd_show(&config, id).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(config: JobEngineConfig, jobs: Vec<String>, exit_when_idle: bool) -> Result<()> {
    tracing::info!(
        orphan_policy = %config.orphan_policy,
        durable = config.database_url.is_some(),
        "Starting job engine"
    );

    let store = open_store(&config).await?;
    let shutdown = CancellationToken::new();
    let manager = Arc::new(
        JobManager::new(store)
            .with_catalog(demo_catalog())
            .with_shutdown(shutdown.clone())
            .with_event_capacity(config.event_capacity),
    );

    tokio::spawn(log_events(manager.subscribe()));

    let recovered = manager.recover_orphans(config.orphan_policy).await?;
    if recovered > 0 {
        tracing::info!(count = recovered, "Reconciled jobs from previous run");
    }

    for name in &jobs {
        match manager.enqueue_named(name).await {
            Ok(id) => tracing::info!(job_id = %id, job_name = %name, "Enqueued job from command line"),
            Err(e) if e.is_conflict() => tracing::warn!(job_name = %name, "{}", e),
            Err(e) => return Err(e.into()),
        }
    }

    let worker = JobWorker::with_config(manager.clone(), config.worker_config());

    if exit_when_idle {
        let ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                ctrl_c.cancel();
            }
        });

        let processed = worker.run_until_idle().await;
        tracing::info!(processed, "Queue drained, exiting");
        return Ok(());
    }

    ServiceHost::new()
        .with_shutdown_token(shutdown)
        .with_grace_period(config.shutdown_grace)
        .with_service(worker)
        .run_until_shutdown()
        .await
}

async fn cmd_list(config: &JobEngineConfig) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.list().await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn cmd_show(config: &JobEngineConfig, id: Uuid) -> Result<()> {
    let store = open_store(config).await?;
    let record = store
        .get(id)
        .await?
        .ok_or(JobError::NotFound(id))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

async fn open_store(config: &JobEngineConfig) -> Result<SharedJobStore> {
    #[cfg(feature = "postgres")]
    if let Some(database_url) = &config.database_url {
        tracing::info!("Connecting to job store database...");
        let store = job_engine::kernel::jobs::PostgresJobStore::connect(database_url).await?;
        store.migrate().await?;
        tracing::info!("Job store ready");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; records will not persist");
    }

    Ok(Arc::new(InMemoryJobStore::new()))
}

/// Jobs available to `run --job NAME`.
fn demo_catalog() -> JobCatalog {
    let mut catalog = JobCatalog::new();

    catalog.register("Noop", |_token| async { Ok(()) });

    catalog.register("Sleep", |token: CancellationToken| async move {
        tokio::select! {
            _ = token.cancelled() => Err(JobError::Cancelled.into()),
            _ = tokio::time::sleep(Duration::from_secs(65)) => Ok(()),
        }
    });

    catalog.register("Fail", |_token| async {
        Err(anyhow::anyhow!("demo job failed on purpose"))
    });

    catalog
}

async fn log_events(mut events: broadcast::Receiver<job_engine::JobEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = %json, "job event"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize job event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
