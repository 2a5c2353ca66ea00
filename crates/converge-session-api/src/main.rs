// Session API server entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use converge_session_api::{app, AppState, SessionService};
use converge_storage::privacy::{ContentCipher, EnvKeySource, PrivacyEngine};
use converge_storage::{
    build_registry, BroadcastEventSink, ColdConfig, EventSink, HotConfig, PolicyStore,
    RedisEventSink, RetentionSweeper, StorageConfig, WarmConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long graceful shutdown waits for in-flight requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "converge-session-api", about = "Tiered session storage service")]
struct Args {
    /// Listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Postgres URL for the warm tier; omit for the in-memory dev store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis URL; enables the Redis hot cache and event stream
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Disable the hot cache entirely
    #[arg(long, env = "HOT_CACHE_DISABLED", default_value_t = false)]
    no_hot_cache: bool,

    /// In-memory hot cache capacity (entries)
    #[arg(long, env = "HOT_CACHE_CAPACITY", default_value_t = 1024)]
    hot_capacity: usize,

    /// Hot cache idle TTL in seconds
    #[arg(long, env = "HOT_CACHE_IDLE_TTL_SECS", default_value_t = 900)]
    hot_idle_ttl_secs: u64,

    /// S3 bucket for the cold archive; omit to disable the cold tier
    #[arg(long, env = "COLD_ARCHIVE_BUCKET")]
    cold_bucket: Option<String>,

    /// Key prefix inside the cold archive bucket
    #[arg(long, env = "COLD_ARCHIVE_PREFIX")]
    cold_prefix: Option<String>,

    /// Local directory cold archive (dev alternative to a bucket)
    #[arg(long, env = "COLD_ARCHIVE_PATH")]
    cold_path: Option<String>,

    /// Retention sweep interval in seconds
    #[arg(long, env = "RETENTION_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    sweep_interval_secs: u64,

    /// Retention sweep batch size
    #[arg(long, env = "RETENTION_SWEEP_BATCH", default_value_t = 200)]
    sweep_batch: i64,

    /// YAML file with the active privacy policy (redaction, encryption,
    /// opt-out settings); omit to record verbatim
    #[arg(long, env = "PRIVACY_POLICY_FILE")]
    privacy_policy_file: Option<String>,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        let warm = Some(match &self.database_url {
            Some(url) => WarmConfig::Postgres { url: url.clone() },
            None => WarmConfig::Memory,
        });
        let hot = if self.no_hot_cache {
            None
        } else {
            Some(match &self.redis_url {
                Some(url) => HotConfig::Redis {
                    url: url.clone(),
                    idle_ttl_secs: self.hot_idle_ttl_secs,
                },
                None => HotConfig::Memory {
                    capacity: self.hot_capacity,
                    idle_ttl_secs: self.hot_idle_ttl_secs,
                },
            })
        };
        let cold = match (&self.cold_bucket, &self.cold_path) {
            (Some(bucket), _) => Some(ColdConfig::S3 {
                bucket: bucket.clone(),
                prefix: self.cold_prefix.clone(),
            }),
            (None, Some(path)) => Some(ColdConfig::Local {
                path: path.clone(),
                prefix: self.cold_prefix.clone(),
            }),
            (None, None) => None,
        };
        StorageConfig { warm, hot, cold }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!(graceSecs = SHUTDOWN_GRACE.as_secs(), "shutdown requested, draining");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_session_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("converge-session-api starting");

    let registry = Arc::new(
        build_registry(args.storage_config())
            .await
            .context("failed to build storage registry")?,
    );
    tracing::info!(
        warm = registry.has_warm(),
        hot = registry.has_hot(),
        cold = registry.has_cold(),
        "storage tiers configured"
    );

    // Content encryption is optional; a policy that requires it without a
    // configured key is a startup failure, not a silent degrade
    let cipher = match ContentCipher::from_source(&EnvKeySource::default()) {
        Ok(cipher) => {
            tracing::info!(keyId = cipher.primary_key_id(), "content encryption enabled");
            Some(Arc::new(cipher))
        }
        Err(e) => {
            tracing::warn!(error = %e, "content encryption disabled");
            None
        }
    };

    let mut rotation_cron = None;
    let privacy = match &args.privacy_policy_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read privacy policy {path}"))?;
            let policy: converge_core::PrivacyPolicy =
                serde_yaml::from_str(&raw).context("failed to parse privacy policy")?;
            rotation_cron = policy.encryption.rotation.clone();
            PrivacyEngine::from_policy(&policy, cipher.clone())
                .context("failed to build privacy engine")?
        }
        None => PrivacyEngine::disabled(),
    };

    let events: Arc<dyn EventSink> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisEventSink::connect(url)
                .await
                .context("failed to connect event sink")?,
        ),
        None => Arc::new(BroadcastEventSink::default()),
    };

    let policies: PolicyStore = Arc::new(parking_lot::RwLock::new(vec![]));
    let service = Arc::new(
        SessionService::new(registry.clone(), Arc::new(privacy), events, policies.clone())
            .context("failed to build session service")?,
    );

    let sweeper = Arc::new(RetentionSweeper::new(
        registry.clone(),
        policies,
        args.sweep_batch,
    ));
    let sweeper_handle = sweeper.spawn(Duration::from_secs(args.sweep_interval_secs));

    // Scheduled key rotation, when the policy asks for it
    let rotation_handle = match (rotation_cron, cipher) {
        (Some(cron_expr), Some(cipher)) => Some(
            converge_storage::privacy::spawn_rotation(
                registry.warm().context("rotation requires the warm store")?,
                cipher,
                &cron_expr,
                500,
            )
            .context("failed to schedule key rotation")?,
        ),
        (Some(_), None) => {
            anyhow::bail!("privacy policy schedules rotation but no content key is configured")
        }
        _ => None,
    };

    let state = AppState::new(service, registry).context("failed to register metrics")?;
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(addr = %args.listen, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper_handle.shutdown().await;
    if let Some(rotation) = rotation_handle {
        rotation.shutdown().await;
    }
    tracing::info!("converge-session-api stopped");
    Ok(())
}
