// Operator entry point: the six controllers plus a small web server for
// liveness, diagnostics, and Prometheus metrics.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use converge_operator::metrics::{Diagnostics, Metrics};
use converge_operator::reconcilers::{Backoff, Context};
use converge_operator::resolver::KubeResolver;
use converge_operator::controller;
use parking_lot::RwLock;
use prometheus::{Registry, TextEncoder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "converge-operator", about = "Reconcilers for the Converge platform")]
struct Args {
    /// Listen address for health and metrics
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    listen: String,
}

#[derive(Clone)]
struct WebState {
    registry: Registry,
    diagnostics: Arc<RwLock<Diagnostics>>,
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn diagnostics(State(state): State<WebState>) -> Json<Diagnostics> {
    Json(state.diagnostics.read().clone())
}

async fn metrics(State(state): State<WebState>) -> String {
    TextEncoder::new()
        .encode_to_string(&state.registry.gather())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_operator=debug,kube=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("converge-operator starting");

    let client = kube::Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let registry = Registry::new();
    let metrics_instruments = Metrics::new()
        .register(&registry)
        .context("failed to register operator metrics")?;
    let diagnostics_state = Arc::new(RwLock::new(Diagnostics::default()));

    let ctx = Arc::new(Context {
        client: client.clone(),
        resolver: Arc::new(KubeResolver::new(client)),
        metrics: metrics_instruments,
        diagnostics: diagnostics_state.clone(),
        policies: Arc::new(RwLock::new(vec![])),
        backoff: Backoff::default(),
    });

    let web_state = WebState {
        registry,
        diagnostics: diagnostics_state,
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/diagnostics", get(diagnostics))
        .route("/metrics", get(metrics))
        .with_state(web_state);
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(addr = %args.listen, "diagnostics server listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "diagnostics server failed");
        }
    });

    controller::run_all(ctx).await?;
    server.abort();
    tracing::info!("converge-operator stopped");
    Ok(())
}
