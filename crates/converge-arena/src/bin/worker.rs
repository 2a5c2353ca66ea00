// Arena worker entry point. One concurrent item per replica; exits 0 once
// the job is complete.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use converge_arena::{run_worker, WorkerOptions};
use converge_queue::{MemoryWorkQueue, QueuePolicy, RedisWorkQueue, WorkQueue};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "arena-worker", about = "Arena work-item executor")]
struct Args {
    /// Queue id of the job to drain
    #[arg(long, env = "ARENA_JOB_ID")]
    job_id: String,

    /// Redis URL backing the work queue
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Directory bundles are materialized into
    #[arg(long, env = "WORK_DIR", default_value = "/workspace-content")]
    work_dir: PathBuf,

    /// Mount point for provider secrets
    #[arg(long, env = "SECRETS_DIR")]
    secrets_dir: Option<PathBuf>,

    /// Consecutive empty polls before the completion check
    #[arg(long, env = "EMPTY_POLLS_BEFORE_EXIT", default_value_t = 3)]
    empty_polls_before_exit: u32,

    /// Job deadline as RFC3339; the worker stops pulling items past it
    #[arg(long, env = "JOB_DEADLINE")]
    deadline: Option<chrono::DateTime<chrono::Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_arena=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let queue: Arc<dyn WorkQueue> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisWorkQueue::connect(url, QueuePolicy::default())
                .await
                .context("failed to connect redis queue")?,
        ),
        None => {
            tracing::warn!("no redis configured, using the in-memory queue (single-process only)");
            Arc::new(MemoryWorkQueue::new(QueuePolicy::default()))
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut options = WorkerOptions::new(&args.job_id, &args.work_dir);
    options.secrets_dir = args.secrets_dir.clone();
    options.empty_polls_before_exit = args.empty_polls_before_exit;
    options.deadline = args.deadline;

    let stats = run_worker(queue, options, shutdown_rx)
        .await
        .context("worker loop failed")?;
    tracing::info!(
        executed = stats.executed,
        acked = stats.acked,
        nacked = stats.nacked,
        "worker finished"
    );
    Ok(())
}
