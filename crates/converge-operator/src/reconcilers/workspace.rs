// Workspace reconciliation: label the governed namespace, record the
// storage-class default, and keep the optional ResourceQuota in place.

use std::sync::Arc;

use converge_core::{CoreError, Result};
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;

use super::Context;
use crate::conditions::{upsert_condition, Condition, ConditionStatus};
use crate::resources::{Workspace, WorkspaceStatus};

pub const WORKSPACE_LABEL: &str = "converge.dev/workspace";
const QUOTA_NAME: &str = "converge-workspace-quota";

/// Desired namespace patch for one workspace.
pub fn namespace_patch(workspace: &Workspace) -> serde_json::Value {
    let mut annotations = serde_json::Map::new();
    if let Some(storage_class) = &workspace.spec.storage_class {
        annotations.insert(
            "converge.dev/default-storage-class".to_string(),
            json!(storage_class),
        );
    }
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": workspace.name_any(),
            "labels": { WORKSPACE_LABEL: workspace.name_any() },
            "annotations": annotations,
        }
    })
}

/// Desired ResourceQuota, when quotas are declared.
pub fn quota_object(workspace: &Workspace) -> Option<serde_json::Value> {
    if workspace.spec.quotas.is_empty() {
        return None;
    }
    Some(json!({
        "apiVersion": "v1",
        "kind": "ResourceQuota",
        "metadata": {
            "name": QUOTA_NAME,
            "namespace": workspace.name_any(),
            "labels": { WORKSPACE_LABEL: workspace.name_any() },
        },
        "spec": { "hard": workspace.spec.quotas }
    }))
}

pub async fn reconcile(workspace: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("Workspace");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let name = workspace.name_any();
    let generation = workspace.metadata.generation.unwrap_or(0);

    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());
    let patch: Namespace = serde_json::from_value(namespace_patch(&workspace))
        .map_err(|e| CoreError::fatal(format!("render namespace: {e}")))?;
    namespaces
        .patch(
            &name,
            &PatchParams::apply("converge-operator").force(),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(|e| CoreError::transient(format!("namespace apply: {e}")))?;

    if let Some(quota) = quota_object(&workspace) {
        let quota: ResourceQuota = serde_json::from_value(quota)
            .map_err(|e| CoreError::fatal(format!("render quota: {e}")))?;
        let quotas: Api<ResourceQuota> = Api::namespaced(ctx.client.clone(), &name);
        quotas
            .patch(
                QUOTA_NAME,
                &PatchParams::apply("converge-operator").force(),
                &Patch::Apply(&quota),
            )
            .await
            .map_err(|e| CoreError::transient(format!("quota apply: {e}")))?;
    }

    let mut status = workspace.status.clone().unwrap_or_default();
    status.observed_generation = Some(generation);
    upsert_condition(
        &mut status.conditions,
        Condition::new("Ready", ConditionStatus::True, "Provisioned", "", generation),
    );
    patch_status(&ctx, &name, &status).await?;
    ctx.backoff.reset(&format!("workspace/{name}"));
    Ok(Action::await_change())
}

async fn patch_status(ctx: &Context, name: &str, status: &WorkspaceStatus) -> Result<()> {
    let api: Api<Workspace> = Api::all(ctx.client.clone());
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;
    Ok(())
}
