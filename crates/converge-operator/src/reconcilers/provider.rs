// Provider reconciliation: verify the referenced secret and its keys
// exist, check model/type consistency, and record a Ready condition.
// Credential failures also emit a Kubernetes event.

use std::sync::Arc;

use converge_core::{CoreError, Result};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::{Api, ResourceExt};
use serde_json::json;

use super::Context;
use crate::conditions::{upsert_condition, Condition, ConditionStatus};
use crate::resolver::RefResolver;
use crate::resources::{Provider, ProviderStatus};

const KNOWN_TYPES: &[&str] = &["openai", "claude", "bedrock", "vertex", "mock", "ollama"];

fn requires_credentials(provider_type: &str) -> bool {
    !matches!(provider_type, "mock" | "ollama")
}

/// Pure validation of one provider against the cluster state the resolver
/// exposes. Returns the failure reason and message on rejection.
pub async fn validate_provider(
    provider: &Provider,
    resolver: &dyn RefResolver,
) -> Result<std::result::Result<(), (String, String)>> {
    let spec = &provider.spec;
    if !KNOWN_TYPES.contains(&spec.provider_type.as_str()) {
        return Ok(Err((
            "UnknownType".into(),
            format!("provider type {:?} is not supported", spec.provider_type),
        )));
    }
    if spec.model.trim().is_empty() {
        return Ok(Err((
            "ModelMissing".into(),
            format!("provider type {} requires a model name", spec.provider_type),
        )));
    }

    match (&spec.credential_secret_ref, requires_credentials(&spec.provider_type)) {
        (None, true) => Ok(Err((
            "CredentialMissing".into(),
            format!(
                "provider type {} requires credentialSecretRef",
                spec.provider_type
            ),
        ))),
        (Some(_), false) => Ok(Err((
            "CredentialUnexpected".into(),
            format!(
                "provider type {} does not take credentials",
                spec.provider_type
            ),
        ))),
        (None, false) => Ok(Ok(())),
        (Some(secret_ref), true) => {
            let namespace = provider.namespace().unwrap_or_else(|| "default".into());
            match resolver.secret_keys(&namespace, &secret_ref.name).await? {
                None => Ok(Err((
                    "SecretNotFound".into(),
                    format!("secret {} not found", secret_ref.name),
                ))),
                Some(keys) if !keys.contains(&secret_ref.key) => Ok(Err((
                    "CredentialKeyMissing".into(),
                    format!(
                        "secret {} has no key {}",
                        secret_ref.name, secret_ref.key
                    ),
                ))),
                Some(_) => Ok(Ok(())),
            }
        }
    }
}

pub async fn reconcile(provider: Arc<Provider>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("Provider");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let namespace = provider.namespace().unwrap_or_else(|| "default".into());
    let name = provider.name_any();
    let generation = provider.metadata.generation.unwrap_or(0);

    let mut status = provider.status.clone().unwrap_or_default();
    status.observed_generation = Some(generation);

    match validate_provider(&provider, ctx.resolver.as_ref()).await? {
        Ok(()) => {
            upsert_condition(
                &mut status.conditions,
                Condition::new("Ready", ConditionStatus::True, "Validated", "", generation),
            );
        }
        Err((reason, message)) => {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    "Ready",
                    ConditionStatus::False,
                    reason.clone(),
                    message.clone(),
                    generation,
                ),
            );
            let recorder = ctx
                .diagnostics
                .read()
                .recorder(ctx.client.clone(), provider.as_ref());
            recorder
                .publish(Event {
                    type_: EventType::Warning,
                    reason,
                    note: Some(message),
                    action: "Validate".into(),
                    secondary: None,
                })
                .await
                .ok();
        }
    }

    let api: Api<Provider> = Api::namespaced(ctx.client.clone(), &namespace);
    api.patch_status(
        &name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;

    ctx.backoff.reset(&format!("provider/{namespace}/{name}"));
    Ok(Action::await_change())
}
