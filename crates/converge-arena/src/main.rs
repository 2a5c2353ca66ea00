// Arena controller entry point: the ArenaJob reconciler plus the template
// HTTP API and diagnostics endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{routing::get, Json, Router};
use clap::Parser;
use converge_arena::controller::{run_controller, Context};
use converge_arena::templates;
use converge_arena::KubeProviderCatalog;
use converge_queue::{MemoryWorkQueue, QueueMetrics, QueuePolicy, RecordingWorkQueue, RedisWorkQueue, WorkQueue};
use prometheus::{Registry, TextEncoder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "arena-controller", about = "Arena job controller")]
struct Args {
    /// Listen address for the template/diagnostics API
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8090")]
    listen: String,

    /// Redis URL backing the work queue; omit for the in-memory dev queue
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Directory bundles are materialized into
    #[arg(long, env = "WORK_DIR", default_value = "/workspace-content")]
    work_dir: PathBuf,

    /// Visibility timeout for popped work items, in seconds
    #[arg(long, env = "VISIBILITY_TIMEOUT_SECS", default_value_t = 300)]
    visibility_timeout_secs: u64,
}

async fn build_queue(args: &Args, registry: &Registry) -> Result<Arc<dyn WorkQueue>> {
    let policy = QueuePolicy {
        max_attempts: 3,
        visibility_timeout: std::time::Duration::from_secs(args.visibility_timeout_secs),
    };
    let inner: Arc<dyn WorkQueue> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisWorkQueue::connect(url, policy)
                .await
                .context("failed to connect redis queue")?,
        ),
        None => {
            tracing::warn!("no redis configured, using the in-memory queue (single-process only)");
            Arc::new(MemoryWorkQueue::new(policy))
        }
    };
    let metrics = QueueMetrics::new()
        .register(registry)
        .context("failed to register queue metrics")?;
    Ok(Arc::new(RecordingWorkQueue::new(inner, metrics)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_arena=debug,kube=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("arena-controller starting");

    let metrics = Registry::new();
    let queue = build_queue(&args, &metrics).await?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let catalog = Arc::new(KubeProviderCatalog::new(client.clone()));
    let ctx = Arc::new(Context::new(client, queue, catalog, args.work_dir.clone()));

    let app = Router::new()
        .merge(templates::routes())
        .route(
            "/healthz",
            get(|| async { Json(serde_json::json!({ "status": "ok" })) }),
        )
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move {
                    TextEncoder::new()
                        .encode_to_string(&metrics.gather())
                        .unwrap_or_default()
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(addr = %args.listen, "template api listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "template api server failed");
        }
    });

    run_controller(ctx).await?;
    server.abort();
    tracing::info!("arena-controller stopped");
    Ok(())
}
