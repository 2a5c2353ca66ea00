// ArenaJob controller.
//
// Per job: materialize the bundle, partition scenario × provider into
// work items, dispatch to the queue, reconcile a worker Deployment sized
// by queue depth within the configured bounds, aggregate on completion,
// and garbage-collect after the TTL. Level-triggered: work items carry
// deterministic ids, so a re-dispatched job redelivers rather than
// duplicates, and workers are idempotent consumers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use converge_core::{CoreError, Result};
use converge_queue::{VisibilitySweeper, WorkQueue};
use parking_lot::Mutex;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::ArenaConfig;
use crate::partition::{filter_scenarios, partition, ScenarioFilter};
use crate::providers::{resolve_providers, ProviderCatalog};
use crate::results::{aggregate, OutputBackend};
use crate::schedule::{decide, next_run, ConcurrencyPolicy, RunDecision};
use crate::source::materialize;
use crate::worker::{ExecutionMode, ItemConfig};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const REQUEUE_RUNNING: Duration = Duration::from_secs(30);
const REQUEUE_IDLE: Duration = Duration::from_secs(300);

/// Kind of work the job fans out.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArenaJobType {
    #[default]
    Evaluation,
    Loadtest,
    Datagen,
}

/// Include/exclude globs over scenario paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ScenarioSelector {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Worker pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct WorkerScaling {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default = "default_min")]
    pub min: i32,
    #[serde(default = "default_max")]
    pub max: i32,
}

fn default_replicas() -> i32 {
    1
}
fn default_min() -> i32 {
    0
}
fn default_max() -> i32 {
    8
}

impl Default for WorkerScaling {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            min: default_min(),
            max: default_max(),
        }
    }
}

/// Cron schedule with a concurrency policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSchedule {
    pub cron: String,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
}

/// ArenaJob: one fan-out of scenarios × providers through the queue.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "arena.converge.dev",
    version = "v1alpha1",
    kind = "ArenaJob",
    namespaced,
    status = "ArenaJobStatus",
    shortname = "aj",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ArenaJobSpec {
    /// Bundle location (http(s) archive, file path, configmap mount)
    pub source_ref: String,
    #[serde(default)]
    pub job_type: ArenaJobType,
    #[serde(default)]
    pub scenarios: ScenarioSelector,
    /// Label selectors over Provider resources in the job's namespace;
    /// empty or "*" selects every provider
    #[serde(default)]
    pub provider_overrides: Vec<String>,
    #[serde(default)]
    pub tool_registry_override: Option<String>,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub workers: WorkerScaling,
    #[serde(default)]
    pub output: Option<OutputBackend>,
    #[serde(default)]
    pub schedule: Option<JobSchedule>,
    #[serde(default)]
    pub ttl_seconds_after_finished: Option<i64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Worker container image
    #[serde(default)]
    pub worker_image: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum ArenaJobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Queue-derived counts mirrored onto the status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArenaJobStatus {
    #[serde(default)]
    pub phase: ArenaJobPhase,
    #[serde(default)]
    pub content_version: Option<String>,
    #[serde(default)]
    pub progress: ProgressSnapshot,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Queue-depth worker sizing, clamped to the configured bounds.
pub fn desired_worker_replicas(outstanding: u64, scaling: &WorkerScaling) -> i32 {
    let desired = outstanding.min(scaling.replicas.max(0) as u64) as i32;
    desired.clamp(scaling.min, scaling.max.max(scaling.min))
}

/// Whether a scheduled job is due at `now`.
pub fn schedule_decision(
    schedule: &JobSchedule,
    last_scheduled: Option<DateTime<Utc>>,
    run_active: bool,
    now: DateTime<Utc>,
) -> Result<Option<RunDecision>> {
    let anchor = last_scheduled.unwrap_or(DateTime::UNIX_EPOCH);
    let due = next_run(&schedule.cron, anchor)?;
    if due > now {
        return Ok(None);
    }
    Ok(Some(decide(schedule.concurrency_policy, run_active)))
}

/// Shared controller state.
pub struct Context {
    pub client: Client,
    pub queue: Arc<dyn WorkQueue>,
    /// Provider CRs of the job's namespace, selected by label
    pub catalog: Arc<dyn ProviderCatalog>,
    pub work_dir: PathBuf,
    /// One visibility sweeper per running job
    pub sweepers: Mutex<std::collections::HashMap<String, VisibilitySweeper>>,
}

impl Context {
    pub fn new(
        client: Client,
        queue: Arc<dyn WorkQueue>,
        catalog: Arc<dyn ProviderCatalog>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            queue,
            catalog,
            work_dir,
            sweepers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn ensure_sweeper(&self, queue_id: &str) {
        let mut sweepers = self.sweepers.lock();
        if !sweepers.contains_key(queue_id) {
            sweepers.insert(
                queue_id.to_string(),
                VisibilitySweeper::spawn(
                    self.queue.clone(),
                    queue_id.to_string(),
                    Duration::from_secs(30),
                ),
            );
        }
    }

    fn stop_sweeper(&self, queue_id: &str) {
        if let Some(sweeper) = self.sweepers.lock().remove(queue_id) {
            tokio::spawn(async move { sweeper.shutdown().await });
        }
    }
}

fn job_queue_id(job: &ArenaJob) -> String {
    format!(
        "{}-{}",
        job.namespace().unwrap_or_else(|| "default".into()),
        job.name_any()
    )
}

fn worker_deployment_name(job: &ArenaJob) -> String {
    format!("{}-workers", job.name_any())
}

/// Render the worker Deployment owned by the job.
fn worker_deployment(job: &ArenaJob, replicas: i32, queue_id: &str) -> Result<Deployment> {
    let name = worker_deployment_name(job);
    let image = job
        .spec
        .worker_image
        .clone()
        .unwrap_or_else(|| "ghcr.io/converge/arena-worker:latest".to_string());
    let owner = job.controller_owner_ref(&()).ok_or_else(|| {
        CoreError::fatal("job has no metadata for owner reference")
    })?;
    let labels = json!({
        "app.kubernetes.io/name": "arena-worker",
        "app.kubernetes.io/instance": job.name_any(),
    });
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": job.namespace(),
            "labels": labels,
            "ownerReferences": [owner],
        },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "containers": [{
                        "name": "worker",
                        "image": image,
                        "args": ["--job-id", queue_id],
                        "env": [
                            { "name": "REDIS_URL", "valueFrom": { "configMapKeyRef": {
                                "name": "arena-queue", "key": "redisUrl" } } }
                        ],
                        "volumeMounts": [
                            { "name": "work", "mountPath": "/workspace-content" }
                        ]
                    }],
                    "volumes": [
                        { "name": "work", "emptyDir": {} }
                    ]
                }
            }
        }
    }))
    .map_err(|e| CoreError::fatal(format!("render worker deployment: {e}")))
}

async fn patch_status(job: &ArenaJob, ctx: &Context, status: &ArenaJobStatus) -> Result<()> {
    let api: Api<ArenaJob> = Api::namespaced(
        ctx.client.clone(),
        &job.namespace().unwrap_or_else(|| "default".into()),
    );
    api.patch_status(
        &job.name_any(),
        &kube::api::PatchParams::default(),
        &kube::api::Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;
    Ok(())
}

async fn apply_deployment(job: &ArenaJob, ctx: &Context, deployment: &Deployment) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(
        ctx.client.clone(),
        &job.namespace().unwrap_or_else(|| "default".into()),
    );
    api.patch(
        &worker_deployment_name(job),
        &kube::api::PatchParams::apply("arena-controller").force(),
        &kube::api::Patch::Apply(deployment),
    )
    .await
    .map_err(|e| CoreError::transient(format!("deployment apply: {e}")))?;
    Ok(())
}

async fn delete_workers(job: &ArenaJob, ctx: &Context) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(
        ctx.client.clone(),
        &job.namespace().unwrap_or_else(|| "default".into()),
    );
    match api
        .delete(&worker_deployment_name(job), &Default::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(CoreError::transient(format!("deployment delete: {e}"))),
    }
}

/// Dispatch the job: materialize, partition, push. Returns the new status.
async fn dispatch(job: &ArenaJob, ctx: &Context) -> Result<ArenaJobStatus> {
    let queue_id = job_queue_id(job);
    let namespace = job.namespace().unwrap_or_else(|| "default".into());
    let bundle = materialize(&job.spec.source_ref, &ctx.work_dir).await?;
    let config = ArenaConfig::load(&bundle.dir)?;

    let filter = ScenarioFilter {
        include: job.spec.scenarios.include.clone(),
        exclude: job.spec.scenarios.exclude.clone(),
    };
    let scenarios = filter_scenarios(&config.scenarios, &filter)?;
    let providers = resolve_providers(
        ctx.catalog.as_ref(),
        &namespace,
        &job.spec.provider_overrides,
    )
    .await?;
    let mut items = partition(
        &queue_id,
        &scenarios,
        &providers,
        &bundle.dir.to_string_lossy(),
        job.spec.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
    );
    // Each item carries its own resolved Provider binding so workers never
    // consult the cluster
    let bindings: BTreeMap<&str, _> = providers.iter().map(|p| (p.id.as_str(), p)).collect();
    for item in &mut items {
        let binding = bindings.get(item.provider_id.as_str()).ok_or_else(|| {
            CoreError::fatal(format!("provider {} vanished after resolution", item.provider_id))
        })?;
        item.config = serde_json::to_value(ItemConfig {
            mode: job.spec.execution.clone(),
            provider: Some((*binding).clone()),
            tool_registry_override: job.spec.tool_registry_override.clone(),
        })
        .map_err(|e| CoreError::fatal(format!("render item config: {e}")))?;
    }
    let total = items.len() as u64;
    info!(
        job = %queue_id,
        contentVersion = %bundle.content_version,
        scenarios = scenarios.len(),
        providers = providers.len(),
        items = total,
        "job dispatched"
    );
    ctx.queue.push(&queue_id, items).await?;

    Ok(ArenaJobStatus {
        phase: ArenaJobPhase::Running,
        content_version: Some(bundle.content_version),
        progress: ProgressSnapshot {
            total,
            pending: total,
            ..Default::default()
        },
        last_scheduled_at: Some(Utc::now()),
        ..Default::default()
    })
}

/// Main reconcile for one ArenaJob.
pub async fn reconcile(job: Arc<ArenaJob>, ctx: Arc<Context>) -> Result<Action> {
    let queue_id = job_queue_id(&job);
    let status = job.status.clone().unwrap_or_default();

    match status.phase {
        ArenaJobPhase::Pending => {
            if let Some(schedule) = &job.spec.schedule {
                match schedule_decision(schedule, status.last_scheduled_at, false, Utc::now())? {
                    None => return Ok(Action::requeue(Duration::from_secs(30))),
                    Some(RunDecision::Skip) => {
                        return Ok(Action::requeue(Duration::from_secs(30)))
                    }
                    Some(_) => {}
                }
            }
            let new_status = dispatch(&job, &ctx).await?;
            ctx.ensure_sweeper(&queue_id);
            let replicas = desired_worker_replicas(
                new_status.progress.pending + new_status.progress.processing,
                &job.spec.workers,
            );
            apply_deployment(&job, &ctx, &worker_deployment(&job, replicas, &queue_id)?).await?;
            patch_status(&job, &ctx, &new_status).await?;
            Ok(Action::requeue(REQUEUE_RUNNING))
        }
        ArenaJobPhase::Running => {
            let progress = ctx.queue.progress(&queue_id).await?;
            let snapshot = ProgressSnapshot {
                total: progress.total,
                pending: progress.pending,
                processing: progress.processing,
                completed: progress.completed,
                failed: progress.failed,
            };
            if !progress.is_complete() {
                ctx.ensure_sweeper(&queue_id);
                let replicas = desired_worker_replicas(
                    progress.pending + progress.processing,
                    &job.spec.workers,
                );
                apply_deployment(&job, &ctx, &worker_deployment(&job, replicas, &queue_id)?)
                    .await?;
                patch_status(
                    &job,
                    &ctx,
                    &ArenaJobStatus {
                        progress: snapshot,
                        ..status
                    },
                )
                .await?;
                return Ok(Action::requeue(REQUEUE_RUNNING));
            }

            ctx.stop_sweeper(&queue_id);
            let results = aggregate(&ctx.queue, &queue_id).await?;
            let result_url = match &job.spec.output {
                Some(backend) => Some(backend.write(&results).await?),
                None => None,
            };
            delete_workers(&job, &ctx).await?;
            let phase = if results.fail == 0 {
                ArenaJobPhase::Succeeded
            } else {
                ArenaJobPhase::Failed
            };
            info!(
                job = %queue_id,
                pass = results.pass,
                fail = results.fail,
                passRate = results.pass_rate,
                "job aggregated"
            );
            patch_status(
                &job,
                &ctx,
                &ArenaJobStatus {
                    phase,
                    progress: snapshot,
                    result_url,
                    finished_at: Some(Utc::now()),
                    message: Some(format!(
                        "{}/{} combinations passed",
                        results.pass, results.total
                    )),
                    ..status
                },
            )
            .await?;
            Ok(Action::requeue(REQUEUE_IDLE))
        }
        ArenaJobPhase::Succeeded | ArenaJobPhase::Failed => {
            // TTL GC, then (for scheduled jobs) rearm for the next run
            if let (Some(ttl), Some(finished_at)) =
                (job.spec.ttl_seconds_after_finished, status.finished_at)
            {
                if Utc::now() >= finished_at + chrono::Duration::seconds(ttl) {
                    delete_workers(&job, &ctx).await?;
                    if job.spec.schedule.is_some() {
                        patch_status(
                            &job,
                            &ctx,
                            &ArenaJobStatus {
                                phase: ArenaJobPhase::Pending,
                                last_scheduled_at: status.last_scheduled_at,
                                ..Default::default()
                            },
                        )
                        .await?;
                        return Ok(Action::requeue(Duration::from_secs(30)));
                    }
                    return Ok(Action::await_change());
                }
            }
            if job.spec.schedule.is_some() {
                return Ok(Action::requeue(Duration::from_secs(30)));
            }
            Ok(Action::await_change())
        }
    }
}

fn error_policy(job: Arc<ArenaJob>, error: &CoreError, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(job = %job.name_any(), error = %error, "reconcile failed, requeueing");
        Action::requeue(Duration::from_secs(10))
    } else {
        error!(job = %job.name_any(), error = %error, "reconcile failed permanently");
        Action::requeue(Duration::from_secs(300))
    }
}

/// Run the ArenaJob controller until shutdown.
pub async fn run_controller(ctx: Arc<Context>) -> anyhow::Result<()> {
    let jobs = Api::<ArenaJob>::all(ctx.client.clone());
    Controller::new(jobs, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
