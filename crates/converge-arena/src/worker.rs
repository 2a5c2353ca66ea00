// Arena worker: pop, execute, ack/nack.
//
// One concurrent item per worker replica. Exits after N consecutive empty
// polls once the job reports complete, or when the job deadline passes.
// Execution failures Nack with the error message; missing credentials and
// unparseable scenarios are terminal per-item outcomes and Ack instead
// (retrying cannot fix them).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use converge_core::{
    AssertionResult, CoreError, ErrorKind, ExecutionMetrics, ExecutionResult, ExecutionStatus,
    ProviderBinding, Result, WorkItem,
};
use converge_fleet::FleetClient;
use converge_queue::WorkQueue;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ArenaConfig, ScenarioSpec};
use crate::engine::DirectEngine;
use crate::source::materialize;

/// Per-item execution mode. Also the `execution` field of the ArenaJob
/// spec, so the controller and worker share one wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process engine built from the bundle config
    Direct,
    /// Drive a deployed agent's facade over WebSocket
    #[serde(rename_all = "camelCase")]
    Fleet { facade_url: String },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Direct
    }
}

/// Everything the controller stamps onto `WorkItem.config` at dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemConfig {
    #[serde(flatten)]
    pub mode: ExecutionMode,
    /// The cluster-resolved Provider binding this item runs against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_registry_override: Option<String>,
}

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub job_id: String,
    /// Directory bundles are materialized into (a PVC in cluster runs)
    pub work_dir: PathBuf,
    /// Mount point for provider secrets
    pub secrets_dir: Option<PathBuf>,
    /// Consecutive empty polls before checking for completion and exiting
    pub empty_polls_before_exit: u32,
    pub poll_min: Duration,
    pub poll_max: Duration,
    /// Job deadline; the worker will not pull new items past it
    pub deadline: Option<DateTime<Utc>>,
}

impl WorkerOptions {
    pub fn new(job_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            work_dir: work_dir.into(),
            secrets_dir: None,
            empty_polls_before_exit: 3,
            poll_min: Duration::from_millis(100),
            poll_max: Duration::from_secs(5),
            deadline: None,
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub executed: u64,
    pub acked: u64,
    pub nacked: u64,
}

/// Run the worker loop until the job completes or shutdown is signaled.
pub async fn run_worker(
    queue: Arc<dyn WorkQueue>,
    options: WorkerOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();
    let mut empty_polls = 0u32;
    let mut interval = options.poll_min;
    let mut bundle_cache: Option<(String, PathBuf)> = None;

    info!(jobId = %options.job_id, "worker started");
    loop {
        if *shutdown.borrow() {
            info!(jobId = %options.job_id, "worker shutting down");
            break;
        }
        if let Some(deadline) = options.deadline {
            if Utc::now() >= deadline {
                warn!(jobId = %options.job_id, "job deadline reached, exiting");
                break;
            }
        }

        match queue.pop(&options.job_id).await {
            Ok(item) => {
                empty_polls = 0;
                interval = options.poll_min;
                stats.executed += 1;
                match execute_item(&item, &options, &mut bundle_cache).await {
                    Ok(result) => {
                        queue.ack(&options.job_id, &item.id, result).await?;
                        stats.acked += 1;
                    }
                    Err(e) => {
                        debug!(itemId = %item.id, error = %e, "execution failed, nacking");
                        queue.nack(&options.job_id, &item.id, &e.to_string()).await?;
                        stats.nacked += 1;
                    }
                }
            }
            Err(CoreError::QueueEmpty) => {
                empty_polls += 1;
                if empty_polls >= options.empty_polls_before_exit {
                    let progress = queue.progress(&options.job_id).await?;
                    if progress.is_complete() {
                        info!(
                            jobId = %options.job_id,
                            executed = stats.executed,
                            "job complete, worker exiting"
                        );
                        break;
                    }
                }
                // Adaptive backoff while other workers hold the remainder
                let wait = interval;
                interval = std::cmp::min(interval.mul_f64(1.5), options.poll_max);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(jobId = %options.job_id, error = %e, "pop failed, backing off");
                tokio::time::sleep(interval).await;
                interval = std::cmp::min(interval.mul_f64(1.5), options.poll_max);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(stats)
}

/// Execute one item. `Err` means Nack (retryable); `Ok` carries the result
/// to Ack, including terminal failures like missing credentials.
async fn execute_item(
    item: &WorkItem,
    options: &WorkerOptions,
    bundle_cache: &mut Option<(String, PathBuf)>,
) -> Result<ExecutionResult> {
    let bundle_dir = match bundle_cache {
        Some((url, dir)) if url == &item.bundle_url => dir.clone(),
        _ => {
            let bundle = materialize(&item.bundle_url, &options.work_dir).await?;
            debug!(contentVersion = %bundle.content_version, "bundle materialized");
            let dir = bundle.dir.clone();
            *bundle_cache = Some((item.bundle_url.clone(), dir.clone()));
            dir
        }
    };

    let config = ArenaConfig::load(&bundle_dir)?;
    let Some(scenario) = crate::config::load_scenario(&bundle_dir, &item.scenario_id)? else {
        // Unparseable scenario: skipped, logged, never fatal to the worker
        return Ok(ExecutionResult::empty_pass());
    };

    let item_config: ItemConfig = if item.config.is_null() {
        ItemConfig {
            mode: ExecutionMode::default(),
            provider: None,
            tool_registry_override: None,
        }
    } else {
        serde_json::from_value(item.config.clone())
            .map_err(|e| CoreError::validation(format!("invalid item config: {e}")))?
    };

    match item_config.mode {
        ExecutionMode::Direct => {
            let binding = item_config.provider.as_ref().ok_or_else(|| {
                CoreError::validation(format!(
                    "item {} carries no provider binding for direct execution",
                    item.id
                ))
            })?;
            let engine = match DirectEngine::from_bindings(
                std::slice::from_ref(binding),
                config.tools.clone(),
                options.secrets_dir.as_deref(),
            ) {
                Ok(engine) => engine,
                Err(e) if e.kind() == ErrorKind::Fatal => {
                    // Missing credentials short-circuit before the engine
                    return Ok(ExecutionResult::failed(e.to_string(), 0));
                }
                Err(e) => return Err(e),
            };
            engine.execute(&scenario, &item.provider_id).await
        }
        ExecutionMode::Fleet { facade_url } => run_fleet(&facade_url, &scenario).await,
    }
}

/// Fleet mode: drive a deployed agent over WebSocket, sending only the
/// latest user message per turn, and report the transcript.
async fn run_fleet(facade_url: &str, scenario: &ScenarioSpec) -> Result<ExecutionResult> {
    if scenario.turns.is_empty() {
        return Ok(ExecutionResult::empty_pass());
    }
    let start = std::time::Instant::now();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut conversation = FleetClient::new(facade_url).connect(cancel_rx).await?;

    let mut assertions: Vec<AssertionResult> = vec![];
    let mut metrics = ExecutionMetrics::default();
    let mut transcript = vec![];
    let mut error = None;

    for turn in &scenario.turns {
        let outcome = conversation.send_turn(&turn.user).await?;
        transcript.push(json!({
            "user": turn.user,
            "assistant": outcome.content,
            "toolCalls": outcome.tool_calls,
            "durationMs": outcome.duration.as_millis() as u64,
        }));

        if let Some(turn_error) = outcome.error {
            error = Some(format!("{} ({})", turn_error.message, turn_error.code));
            metrics.runs_executed += 1;
            metrics.runs_failed += 1;
            break;
        }
        let mut turn_passed = true;
        for assertion in &turn.expect {
            let result = crate::engine::evaluate_assertion(assertion, &outcome.content)?;
            turn_passed &= result.passed;
            assertions.push(result);
        }
        metrics.runs_executed += 1;
        if turn_passed {
            metrics.runs_passed += 1;
        } else {
            metrics.runs_failed += 1;
        }
        metrics.total_duration_ms += outcome.duration.as_millis() as u64;
    }
    conversation.close().await;

    let status = if error.is_some() {
        ExecutionStatus::Fail
    } else {
        ExecutionStatus::Pass
    };
    Ok(ExecutionResult {
        status,
        duration_ms: start.elapsed().as_millis() as u64,
        error,
        metrics,
        assertions,
        transcript: Some(json!(transcript)),
    }
    .finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{ProviderDefaults, ProviderType};
    use converge_queue::{MemoryWorkQueue, QueuePolicy};
    use std::path::Path;

    fn write_bundle(dir: &Path, scenario_body: &str) {
        std::fs::create_dir_all(dir.join("scenarios")).unwrap();
        std::fs::write(
            dir.join("arena.yaml"),
            "scenarios:\n  - scenarios/greet.yaml\n",
        )
        .unwrap();
        std::fs::write(dir.join("scenarios/greet.yaml"), scenario_body).unwrap();
    }

    fn mock_binding(id: &str) -> ProviderBinding {
        ProviderBinding {
            id: id.into(),
            provider_type: ProviderType::Mock,
            model: "mock-small".into(),
            base_url: None,
            credential: None,
            defaults: ProviderDefaults::default(),
        }
    }

    /// Item stamped the way the controller dispatches it.
    fn direct_item(job: &str, scenario: &str, bundle: &Path) -> WorkItem {
        let binding = mock_binding("mock-1");
        let mut item = WorkItem::new(job, scenario, &binding.id, bundle.to_str().unwrap(), 3);
        item.config = serde_json::to_value(ItemConfig {
            mode: ExecutionMode::Direct,
            provider: Some(binding),
            tool_registry_override: None,
        })
        .unwrap();
        item
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("worker-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_worker_drains_job_and_exits() {
        let bundle = temp_dir("bundle");
        write_bundle(
            &bundle,
            r#"
id: greet
turns:
  - user: "hello"
    expect:
      - contains: {name: echo, value: "hello"}
"#,
        );

        let queue = Arc::new(MemoryWorkQueue::new(QueuePolicy::default()));
        queue
            .push(
                "job-1",
                vec![direct_item("job-1", "scenarios/greet.yaml", &bundle)],
            )
            .await
            .unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let mut options = WorkerOptions::new("job-1", temp_dir("work"));
        options.poll_min = Duration::from_millis(5);
        options.poll_max = Duration::from_millis(10);
        let stats = run_worker(queue.clone(), options, shutdown).await.unwrap();

        assert_eq!(stats.executed, 1);
        assert_eq!(stats.acked, 1);
        let progress = queue.progress("job-1").await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.completed, 1);

        let item = queue
            .get_item("job-1", "scenarios/greet.yaml@mock-1")
            .await
            .unwrap();
        let result = item.result.unwrap();
        assert_eq!(result.status, ExecutionStatus::Pass);
        std::fs::remove_dir_all(bundle).ok();
    }

    #[tokio::test]
    async fn test_unparseable_scenario_acks_without_failing_worker() {
        let bundle = temp_dir("bundle");
        write_bundle(&bundle, "turns: {broken: [yaml");

        let queue = Arc::new(MemoryWorkQueue::new(QueuePolicy::default()));
        queue
            .push(
                "job-1",
                vec![direct_item("job-1", "scenarios/greet.yaml", &bundle)],
            )
            .await
            .unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let mut options = WorkerOptions::new("job-1", temp_dir("work"));
        options.poll_min = Duration::from_millis(5);
        let stats = run_worker(queue.clone(), options, shutdown).await.unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.nacked, 0);
        std::fs::remove_dir_all(bundle).ok();
    }

    #[tokio::test]
    async fn test_missing_bundle_nacks_until_failed() {
        let queue = Arc::new(MemoryWorkQueue::new(QueuePolicy {
            max_attempts: 2,
            visibility_timeout: Duration::from_secs(300),
        }));
        queue
            .push(
                "job-1",
                vec![WorkItem::new("job-1", "scenarios/x.yaml", "mock-1", "/nonexistent", 2)],
            )
            .await
            .unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let mut options = WorkerOptions::new("job-1", temp_dir("work"));
        options.poll_min = Duration::from_millis(5);
        let stats = run_worker(queue.clone(), options, shutdown).await.unwrap();

        // Both attempts were delivered to this worker and nacked
        assert_eq!(stats.nacked, 2);
        let progress = queue.progress("job-1").await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.failed, 1);
    }

    #[tokio::test]
    async fn test_execution_mode_parse() {
        let direct: ExecutionMode = serde_json::from_value(json!({"mode": "direct"})).unwrap();
        assert!(matches!(direct, ExecutionMode::Direct));
        let fleet: ExecutionMode =
            serde_json::from_value(json!({"mode": "fleet", "facadeUrl": "ws://agent:8081/ws"}))
                .unwrap();
        match fleet {
            ExecutionMode::Fleet { facade_url } => assert_eq!(facade_url, "ws://agent:8081/ws"),
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_item_config_round_trip() {
        let config = ItemConfig {
            mode: ExecutionMode::Direct,
            provider: Some(mock_binding("mock-1")),
            tool_registry_override: Some("crm-tools".into()),
        };
        let json = serde_json::to_value(&config).unwrap();
        // Flattened mode tag sits beside the binding
        assert_eq!(json["mode"], "direct");
        assert_eq!(json["provider"]["id"], "mock-1");
        assert_eq!(json["toolRegistryOverride"], "crm-tools");

        let back: ItemConfig = serde_json::from_value(json).unwrap();
        assert!(matches!(back.mode, ExecutionMode::Direct));
        assert_eq!(back.provider.unwrap().id, "mock-1");
    }

    #[tokio::test]
    async fn test_direct_item_without_binding_is_rejected() {
        let bundle = temp_dir("bundle");
        write_bundle(
            &bundle,
            "id: greet\nturns:\n  - user: \"hello\"\n",
        );

        let queue = Arc::new(MemoryWorkQueue::new(QueuePolicy {
            max_attempts: 1,
            visibility_timeout: Duration::from_secs(300),
        }));
        let mut item = WorkItem::new("job-1", "scenarios/greet.yaml", "mock-1", bundle.to_str().unwrap(), 1);
        item.config = json!({"mode": "direct"});
        queue.push("job-1", vec![item]).await.unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let mut options = WorkerOptions::new("job-1", temp_dir("work"));
        options.poll_min = Duration::from_millis(5);
        let stats = run_worker(queue.clone(), options, shutdown).await.unwrap();
        assert_eq!(stats.nacked, 1);

        let failed = queue
            .get_item("job-1", "scenarios/greet.yaml@mock-1")
            .await
            .unwrap();
        assert!(failed.error.unwrap().contains("provider binding"));
    }
}
