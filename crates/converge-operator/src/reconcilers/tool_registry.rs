// ToolRegistry reconciliation: name uniqueness and syntactic endpoint
// validation. No probes; reachability is the runtime's concern.

use std::collections::HashSet;
use std::sync::Arc;

use converge_core::{CoreError, Result};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use url::Url;

use super::Context;
use crate::conditions::{upsert_condition, Condition, ConditionStatus};
use crate::resources::{ToolRegistry, ToolRegistrySpec};

const KNOWN_HANDLERS: &[&str] = &["http", "grpc", "mcp"];

/// Validate a registry spec; returns every problem found.
pub fn validate_registry(spec: &ToolRegistrySpec) -> Vec<String> {
    let mut problems = vec![];
    let mut seen = HashSet::new();
    for tool in &spec.tools {
        if tool.name.trim().is_empty() {
            problems.push("tool with empty name".to_string());
            continue;
        }
        if !seen.insert(tool.name.clone()) {
            problems.push(format!("duplicate tool name {:?}", tool.name));
        }
        if !KNOWN_HANDLERS.contains(&tool.handler_type.as_str()) {
            problems.push(format!(
                "tool {:?} has unknown handler type {:?}",
                tool.name, tool.handler_type
            ));
        }
        match Url::parse(&tool.endpoint) {
            Ok(url) if url.host().is_some() => {}
            Ok(_) => problems.push(format!("tool {:?} endpoint has no host", tool.name)),
            Err(e) => problems.push(format!("tool {:?} endpoint invalid: {e}", tool.name)),
        }
    }
    problems
}

pub async fn reconcile(registry: Arc<ToolRegistry>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("ToolRegistry");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let namespace = registry.namespace().unwrap_or_else(|| "default".into());
    let name = registry.name_any();
    let generation = registry.metadata.generation.unwrap_or(0);

    let mut status = registry.status.clone().unwrap_or_default();
    status.observed_generation = Some(generation);

    let problems = validate_registry(&registry.spec);
    let condition = if problems.is_empty() {
        Condition::new("Ready", ConditionStatus::True, "Validated", "", generation)
    } else {
        Condition::new(
            "Ready",
            ConditionStatus::False,
            "ValidationFailed",
            problems.join("; "),
            generation,
        )
    };
    upsert_condition(&mut status.conditions, condition);

    let api: Api<ToolRegistry> = Api::namespaced(ctx.client.clone(), &namespace);
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;

    ctx.backoff.reset(&format!("tools/{namespace}/{name}"));
    Ok(Action::await_change())
}
