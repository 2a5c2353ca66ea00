// SessionRetentionPolicy reconciliation: validate the thresholds, compute
// the scoped policy, and publish it to the shared store the retention
// sweeper reads.

use std::sync::Arc;

use converge_core::{CoreError, PolicyScope, Result, RetentionPolicy};
use converge_storage::PolicyStore;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;

use super::Context;
use crate::conditions::{upsert_condition, Condition, ConditionStatus};
use crate::resources::{
    RetentionScope, SessionRetentionPolicy, SessionRetentionPolicySpec,
    SessionRetentionPolicyStatus,
};

/// Translate a spec into the core policy the sweeper consumes.
pub fn to_core_policy(spec: &SessionRetentionPolicySpec) -> Result<RetentionPolicy> {
    let scope = match spec.scope {
        RetentionScope::Global => PolicyScope::Global,
        RetentionScope::Workspace => PolicyScope::Workspace {
            workspace: spec
                .workspace
                .clone()
                .ok_or_else(|| CoreError::validation("workspace scope requires .workspace"))?,
        },
        RetentionScope::Agent => PolicyScope::Agent {
            workspace: spec
                .workspace
                .clone()
                .ok_or_else(|| CoreError::validation("agent scope requires .workspace"))?,
            agent: spec
                .agent
                .clone()
                .ok_or_else(|| CoreError::validation("agent scope requires .agent"))?,
        },
    };
    let policy = RetentionPolicy {
        scope,
        warm_days: spec.warm_days,
        cold_days: spec.cold_days,
        purge_after_days: spec.purge_after_days,
    };
    policy.validate()?;
    Ok(policy)
}

/// Replace any previously published policy with the same scope.
pub fn publish(store: &PolicyStore, policy: RetentionPolicy) {
    let mut policies = store.write();
    policies.retain(|existing| existing.scope != policy.scope);
    policies.push(policy);
}

pub async fn reconcile(
    resource: Arc<SessionRetentionPolicy>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("SessionRetentionPolicy");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let name = resource.name_any();
    let generation = resource.metadata.generation.unwrap_or(0);
    let mut status = resource.status.clone().unwrap_or_default();
    status.observed_generation = Some(generation);

    match to_core_policy(&resource.spec) {
        Ok(policy) => {
            publish(&ctx.policies, policy);
            upsert_condition(
                &mut status.conditions,
                Condition::new("Ready", ConditionStatus::True, "Published", "", generation),
            );
        }
        Err(e) if matches!(e, CoreError::Validation(_)) => {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    "Ready",
                    ConditionStatus::False,
                    "ValidationFailed",
                    e.to_string(),
                    generation,
                ),
            );
        }
        Err(e) => return Err(e),
    }

    let api: Api<SessionRetentionPolicy> = Api::all(ctx.client.clone());
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;

    ctx.backoff.reset(&format!("retention/{name}"));
    Ok(Action::await_change())
}
