// Controller wiring: one controller per declared kind, sharing one
// context. Transient and conflict errors requeue with exponential backoff
// capped at five minutes; validation errors wait for the user to mutate
// the spec (observed as a generation bump).

use std::sync::Arc;
use std::time::Duration;

use converge_core::CoreError;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, ResourceExt};
use tracing::{error, warn};

use crate::reconcilers::{agent, prompt_pack, provider, retention, tool_registry, workspace, Context};
use crate::resources::{
    AgentRuntime, PromptPack, Provider, SessionRetentionPolicy, ToolRegistry, Workspace,
};

fn failure_action(kind: &str, key: String, err: &CoreError, ctx: &Context) -> Action {
    ctx.metrics.reconcile_failure(kind, err);
    if err.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(kind, object = %key, error = %err, delaySecs = delay.as_secs(), "reconcile requeued");
        Action::requeue(delay)
    } else {
        // Permanent: conditions already reflect it; wait for a spec change
        error!(kind, object = %key, error = %err, "reconcile failed permanently");
        Action::requeue(Duration::from_secs(3600))
    }
}

macro_rules! kind_error_policy {
    ($kind:literal) => {
        |obj: Arc<_>, err: &CoreError, ctx: Arc<Context>| {
            let key = format!(
                "{}/{}/{}",
                $kind,
                obj.namespace().unwrap_or_default(),
                obj.name_any()
            );
            failure_action($kind, key, err, &ctx)
        }
    };
}

/// Run every platform controller until shutdown.
pub async fn run_all(ctx: Arc<Context>) -> anyhow::Result<()> {
    let watcher = WatcherConfig::default().any_semantic();
    let client = ctx.client.clone();

    let agents = Controller::new(Api::<AgentRuntime>::all(client.clone()), watcher.clone())
        .owns(Api::<Deployment>::all(client.clone()), watcher.clone())
        .shutdown_on_signal()
        .run(agent::reconcile, kind_error_policy!("AgentRuntime"), ctx.clone())
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()));

    let packs = Controller::new(Api::<PromptPack>::all(client.clone()), watcher.clone())
        .shutdown_on_signal()
        .run(
            prompt_pack::reconcile,
            kind_error_policy!("PromptPack"),
            ctx.clone(),
        )
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()));

    let providers = Controller::new(Api::<Provider>::all(client.clone()), watcher.clone())
        .shutdown_on_signal()
        .run(
            provider::reconcile,
            kind_error_policy!("Provider"),
            ctx.clone(),
        )
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()));

    let registries = Controller::new(Api::<ToolRegistry>::all(client.clone()), watcher.clone())
        .shutdown_on_signal()
        .run(
            tool_registry::reconcile,
            kind_error_policy!("ToolRegistry"),
            ctx.clone(),
        )
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()));

    let workspaces = Controller::new(Api::<Workspace>::all(client.clone()), watcher.clone())
        .shutdown_on_signal()
        .run(
            workspace::reconcile,
            kind_error_policy!("Workspace"),
            ctx.clone(),
        )
        .filter_map(|result| async move { result.ok() })
        .for_each(|_| futures::future::ready(()));

    let retention_policies = Controller::new(
        Api::<SessionRetentionPolicy>::all(client.clone()),
        watcher,
    )
    .shutdown_on_signal()
    .run(
        retention::reconcile,
        kind_error_policy!("SessionRetentionPolicy"),
        ctx,
    )
    .filter_map(|result| async move { result.ok() })
    .for_each(|_| futures::future::ready(()));

    tokio::join!(
        agents,
        packs,
        providers,
        registries,
        workspaces,
        retention_policies
    );
    Ok(())
}
