// AgentRuntime reconciliation.
//
// Resolves the provider/pack/tool references, renders a content-addressed
// configuration, and converges the owned children: one Deployment whose
// pod runs the facade and runtime containers side by side on loopback,
// one Service, and scaling metadata carried as annotations. Conditions:
// Ready, PackContentValid, ProviderBound.

use std::sync::Arc;
use std::time::Duration;

use converge_core::{CoreError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::Context;
use crate::conditions::{get_condition, upsert_condition, Condition, ConditionStatus};
use crate::phase::{derive_phase, PhaseInputs};
use crate::reconcilers::prompt_pack::compile_pack;
use crate::resolver::RefResolver;
use crate::resources::{AgentRuntime, AgentRuntimeStatus};

pub const AGENT_FINALIZER: &str = "converge.dev/agent-runtime";
const RUNTIME_GRPC_PORT: i32 = 50051;

/// Everything one reconcile pass wants the world to look like.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredAgentState {
    pub conditions: Vec<Condition>,
    pub config_hash: Option<String>,
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
}

fn deployment_name(agent: &AgentRuntime) -> String {
    format!("{}-agent", agent.name_any())
}

fn service_name(agent: &AgentRuntime) -> String {
    agent.name_any()
}

/// Compute the desired children and conditions for one agent.
///
/// Pure over the resolver: calling it twice against unchanged state yields
/// the same result (modulo condition timestamps, which the upsert step
/// stabilizes).
pub async fn compute_desired(
    agent: &AgentRuntime,
    resolver: &dyn RefResolver,
    observed_pod_ready: bool,
) -> Result<DesiredAgentState> {
    let namespace = agent.namespace().unwrap_or_else(|| "default".into());
    let generation = agent.metadata.generation.unwrap_or(0);
    let mut conditions = vec![];
    let mut ready_blockers: Vec<String> = vec![];

    // Provider
    let provider = resolver
        .provider(&namespace, &agent.spec.provider_ref.name)
        .await?;
    let (provider, provider_bound) = match provider {
        None => {
            conditions.push(Condition::new(
                "ProviderBound",
                ConditionStatus::False,
                "ProviderNotFound",
                format!("provider {} not found", agent.spec.provider_ref.name),
                generation,
            ));
            ready_blockers.push("provider unresolved".into());
            (None, false)
        }
        Some(provider) => {
            let provider_ready = provider
                .status
                .as_ref()
                .and_then(|s| get_condition(&s.conditions, "Ready"))
                .map(Condition::is_true)
                // No status yet: bound, its own reconciler will weigh in
                .unwrap_or(true);
            if provider_ready {
                conditions.push(Condition::new(
                    "ProviderBound",
                    ConditionStatus::True,
                    "Resolved",
                    "",
                    generation,
                ));
            } else {
                conditions.push(Condition::new(
                    "ProviderBound",
                    ConditionStatus::False,
                    "ProviderNotReady",
                    format!("provider {} failed validation", agent.spec.provider_ref.name),
                    generation,
                ));
                ready_blockers.push("provider not ready".into());
            }
            (Some(provider), provider_ready)
        }
    };

    // PromptPack
    let pack = resolver
        .prompt_pack(&namespace, &agent.spec.prompt_pack_ref.name)
        .await?;
    let pack_hash = match pack {
        None => {
            conditions.push(Condition::new(
                "PackContentValid",
                ConditionStatus::False,
                "PackNotFound",
                format!("prompt pack {} not found", agent.spec.prompt_pack_ref.name),
                generation,
            ));
            ready_blockers.push("prompt pack unresolved".into());
            None
        }
        Some(pack) => match compile_pack(&pack, resolver).await {
            Ok(compiled) if compiled.warnings.is_empty() => {
                conditions.push(Condition::new(
                    "PackContentValid",
                    ConditionStatus::True,
                    "Validated",
                    "",
                    generation,
                ));
                Some(compiled.content_hash)
            }
            Ok(compiled) => {
                // Warnings downgrade validity
                conditions.push(Condition::new(
                    "PackContentValid",
                    ConditionStatus::False,
                    "ContentIssuesFound",
                    compiled.warnings.join("; "),
                    generation,
                ));
                ready_blockers.push("pack content issues".into());
                None
            }
            Err(e) if matches!(e, CoreError::Validation(_)) => {
                conditions.push(Condition::new(
                    "PackContentValid",
                    ConditionStatus::False,
                    "ValidationFailed",
                    e.to_string(),
                    generation,
                ));
                ready_blockers.push("pack invalid".into());
                None
            }
            Err(e) => return Err(e),
        },
    };

    // Optional tool registry
    let tools = match &agent.spec.tool_registry_ref {
        None => Some(vec![]),
        Some(tool_ref) => match resolver.tool_registry(&namespace, &tool_ref.name).await? {
            Some(registry) => Some(registry.spec.tools),
            None => {
                ready_blockers.push(format!("tool registry {} unresolved", tool_ref.name));
                None
            }
        },
    };

    // Content-addressed configuration
    let prereqs_ok = pack_hash.is_some() && provider_bound && tools.is_some();
    let config_hash = if prereqs_ok {
        let provider = provider.as_ref().ok_or_else(|| {
            CoreError::fatal("provider vanished after resolution")
        })?;
        let config = json!({
            "packHash": pack_hash,
            "provider": {
                "type": provider.spec.provider_type,
                "model": provider.spec.model,
                "baseUrl": provider.spec.base_url,
                "credentialSecretRef": provider.spec.credential_secret_ref,
            },
            "tools": tools,
        });
        let canonical = serde_json::to_vec(&config)
            .map_err(|e| CoreError::fatal(format!("serialize agent config: {e}")))?;
        Some(hex::encode(Sha256::digest(&canonical))[..16].to_string())
    } else {
        None
    };

    // Ready aggregates everything, including the observed pod
    if prereqs_ok && observed_pod_ready {
        conditions.push(Condition::new(
            "Ready",
            ConditionStatus::True,
            "Running",
            "",
            generation,
        ));
    } else {
        if prereqs_ok {
            ready_blockers.push("agent pod not ready".into());
        }
        conditions.push(Condition::new(
            "Ready",
            ConditionStatus::False,
            "NotReady",
            ready_blockers.join("; "),
            generation,
        ));
    }

    let (deployment, service) = if prereqs_ok {
        let provider = provider.as_ref().ok_or_else(|| {
            CoreError::fatal("provider vanished after resolution")
        })?;
        let hash = config_hash.clone().unwrap_or_default();
        (
            Some(render_deployment(agent, provider, &hash)?),
            Some(render_service(agent)?),
        )
    } else {
        (None, None)
    };

    Ok(DesiredAgentState {
        conditions,
        config_hash,
        deployment,
        service,
    })
}

fn render_deployment(
    agent: &AgentRuntime,
    provider: &crate::resources::Provider,
    config_hash: &str,
) -> Result<Deployment> {
    let owner = agent
        .controller_owner_ref(&())
        .ok_or_else(|| CoreError::fatal("agent has no object metadata"))?;
    let labels = json!({
        "app.kubernetes.io/name": "converge-agent",
        "app.kubernetes.io/instance": agent.name_any(),
    });
    let facade_image = agent
        .spec
        .facade_image
        .clone()
        .unwrap_or_else(|| "ghcr.io/converge/agent-facade:latest".into());
    let runtime_image = agent
        .spec
        .runtime_image
        .clone()
        .unwrap_or_else(|| "ghcr.io/converge/agent-runtime:latest".into());

    let mut runtime_env = vec![
        json!({ "name": "PROVIDER_TYPE", "value": provider.spec.provider_type }),
        json!({ "name": "PROVIDER_MODEL", "value": provider.spec.model }),
        json!({ "name": "GRPC_PORT", "value": RUNTIME_GRPC_PORT.to_string() }),
    ];
    if let Some(base_url) = &provider.spec.base_url {
        runtime_env.push(json!({ "name": "PROVIDER_BASE_URL", "value": base_url }));
    }
    if let Some(secret_ref) = &provider.spec.credential_secret_ref {
        runtime_env.push(json!({
            "name": "PROVIDER_API_KEY",
            "valueFrom": { "secretKeyRef": { "name": secret_ref.name, "key": secret_ref.key } }
        }));
    }

    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": deployment_name(agent),
            "namespace": agent.namespace(),
            "labels": labels,
            "annotations": {
                "converge.dev/config-hash": config_hash,
                "converge.dev/scale-min": agent.spec.scaling.min.to_string(),
                "converge.dev/scale-max": agent.spec.scaling.max.to_string(),
                "converge.dev/scale-trigger": agent.spec.scaling.trigger,
            },
            "ownerReferences": [owner],
        },
        "spec": {
            "replicas": agent.spec.scaling.min,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": {
                    "labels": labels,
                    "annotations": { "converge.dev/config-hash": config_hash },
                },
                "spec": {
                    "containers": [
                        {
                            "name": "facade",
                            "image": facade_image,
                            "ports": [{ "containerPort": agent.spec.facade.port, "name": "ws" }],
                            "env": [
                                { "name": "FACADE_TYPE", "value": agent.spec.facade.facade_type },
                                // Facade and runtime share only loopback
                                { "name": "RUNTIME_ADDR", "value": format!("127.0.0.1:{RUNTIME_GRPC_PORT}") }
                            ],
                            "readinessProbe": {
                                "httpGet": { "path": "/healthz", "port": agent.spec.facade.port },
                                "initialDelaySeconds": 3
                            }
                        },
                        {
                            "name": "runtime",
                            "image": runtime_image,
                            "env": runtime_env,
                        }
                    ]
                }
            }
        }
    }))
    .map_err(|e| CoreError::fatal(format!("render agent deployment: {e}")))
}

fn render_service(agent: &AgentRuntime) -> Result<Service> {
    let owner = agent
        .controller_owner_ref(&())
        .ok_or_else(|| CoreError::fatal("agent has no object metadata"))?;
    let labels = json!({
        "app.kubernetes.io/name": "converge-agent",
        "app.kubernetes.io/instance": agent.name_any(),
    });
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": service_name(agent),
            "namespace": agent.namespace(),
            "labels": labels,
            "ownerReferences": [owner],
        },
        "spec": {
            "selector": labels,
            "ports": [{ "name": "ws", "port": agent.spec.facade.port, "targetPort": agent.spec.facade.port }]
        }
    }))
    .map_err(|e| CoreError::fatal(format!("render agent service: {e}")))
}

async fn observed_pod_ready(agent: &AgentRuntime, ctx: &Context) -> Result<bool> {
    let namespace = agent.namespace().unwrap_or_else(|| "default".into());
    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    match api.get_opt(&deployment_name(agent)).await {
        Ok(Some(deployment)) => Ok(deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            > 0),
        Ok(None) => Ok(false),
        Err(e) => Err(CoreError::transient(format!("deployment get: {e}"))),
    }
}

async fn apply(agent: Arc<AgentRuntime>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = agent.namespace().unwrap_or_else(|| "default".into());
    let name = agent.name_any();
    let generation = agent.metadata.generation.unwrap_or(0);

    let pod_ready = observed_pod_ready(&agent, &ctx).await?;
    let desired = compute_desired(&agent, ctx.resolver.as_ref(), pod_ready).await?;

    if let Some(deployment) = &desired.deployment {
        let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        api.patch(
            &deployment_name(&agent),
            &PatchParams::apply("converge-operator").force(),
            &Patch::Apply(deployment),
        )
        .await
        .map_err(|e| CoreError::transient(format!("deployment apply: {e}")))?;
    }
    if let Some(service) = &desired.service {
        let api: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);
        api.patch(
            &service_name(&agent),
            &PatchParams::apply("converge-operator").force(),
            &Patch::Apply(service),
        )
        .await
        .map_err(|e| CoreError::transient(format!("service apply: {e}")))?;
    }

    let mut status = agent.status.clone().unwrap_or_default();
    let previous_phase = status.phase;
    for condition in desired.conditions {
        upsert_condition(&mut status.conditions, condition);
    }
    status.observed_generation = Some(generation);
    if desired.config_hash.is_some() && status.config_hash != desired.config_hash {
        let recorder = ctx
            .diagnostics
            .read()
            .recorder(ctx.client.clone(), agent.as_ref());
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "Configured".into(),
                note: desired.config_hash.clone(),
                action: "Render".into(),
                secondary: None,
            })
            .await
            .ok();
        status.config_hash = desired.config_hash;
    }
    status.phase = derive_phase(PhaseInputs {
        deleting: false,
        children_released: false,
        pod_ready,
        previous: previous_phase,
        conditions: Some(&status.conditions),
    });

    patch_status(&ctx, &namespace, &name, &status).await?;
    ctx.backoff.reset(&format!("agent/{namespace}/{name}"));
    // Level-triggered: re-observe pod readiness periodically
    Ok(Action::requeue(Duration::from_secs(120)))
}

async fn cleanup(agent: Arc<AgentRuntime>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = agent.namespace().unwrap_or_else(|| "default".into());
    let name = agent.name_any();

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    match deployments
        .delete(&deployment_name(&agent), &Default::default())
        .await
    {
        Ok(_) | Err(kube::Error::Api(kube::core::ErrorResponse { code: 404, .. })) => {}
        Err(e) => return Err(CoreError::transient(format!("deployment delete: {e}"))),
    }
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);
    match services
        .delete(&service_name(&agent), &Default::default())
        .await
    {
        Ok(_) | Err(kube::Error::Api(kube::core::ErrorResponse { code: 404, .. })) => {}
        Err(e) => return Err(CoreError::transient(format!("service delete: {e}"))),
    }

    let recorder = ctx
        .diagnostics
        .read()
        .recorder(ctx.client.clone(), agent.as_ref());
    recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: "Terminated".into(),
            note: Some(format!("released children of {name}")),
            action: "Delete".into(),
            secondary: None,
        })
        .await
        .ok();
    tracing::info!(agent = %name, namespace = %namespace, "agent terminated");
    Ok(Action::await_change())
}

/// Entry point wired into the controller: finalizer dance around
/// apply/cleanup.
pub async fn reconcile(agent: Arc<AgentRuntime>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("AgentRuntime");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let namespace = agent.namespace().unwrap_or_else(|| "default".into());
    let api: Api<AgentRuntime> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, AGENT_FINALIZER, agent, |event| async {
        match event {
            Finalizer::Apply(agent) => apply(agent, ctx.clone()).await,
            Finalizer::Cleanup(agent) => cleanup(agent, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| CoreError::transient(format!("finalizer: {e}")))
}

async fn patch_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &AgentRuntimeStatus,
) -> Result<()> {
    let api: Api<AgentRuntime> = Api::namespaced(ctx.client.clone(), namespace);
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::resources::{
        AgentRuntimeSpec, FacadeSpec, LocalRef, PackSource, PromptPack, PromptPackSpec,
        PromptTemplate, Provider, ProviderDefaultsSpec, ProviderSpec, ScalingSpec, SecretKeyRef,
        ToolRegistry, ToolRegistrySpec, ToolSpec,
    };
    use std::collections::BTreeMap;

    fn agent(tool_registry: Option<&str>) -> AgentRuntime {
        let mut agent = AgentRuntime::new(
            "support-bot",
            AgentRuntimeSpec {
                prompt_pack_ref: LocalRef {
                    name: "support-pack".into(),
                },
                provider_ref: LocalRef {
                    name: "openai-prod".into(),
                },
                tool_registry_ref: tool_registry.map(|name| LocalRef { name: name.into() }),
                facade: FacadeSpec::default(),
                scaling: ScalingSpec::default(),
                facade_image: None,
                runtime_image: None,
            },
        );
        agent.metadata.namespace = Some("acme".into());
        agent.metadata.generation = Some(2);
        agent.metadata.uid = Some("uid-1".into());
        agent
    }

    fn provider() -> Provider {
        let mut provider = Provider::new(
            "openai-prod",
            ProviderSpec {
                provider_type: "openai".into(),
                model: "gpt-4o".into(),
                base_url: None,
                credential_secret_ref: Some(SecretKeyRef {
                    name: "llm-keys".into(),
                    key: "openai".into(),
                }),
                defaults: ProviderDefaultsSpec::default(),
            },
        );
        provider.metadata.namespace = Some("acme".into());
        provider
    }

    fn pack(valid: bool) -> PromptPack {
        let mut prompts = BTreeMap::new();
        prompts.insert(
            "system".to_string(),
            PromptTemplate {
                template: if valid { "You are helpful.".into() } else { "  ".into() },
                params: vec![],
            },
        );
        let mut pack = PromptPack::new(
            "support-pack",
            PromptPackSpec {
                version: "1.0.0".into(),
                source: PackSource::ConfigMap {
                    name: "support-pack-src".into(),
                },
                prompts,
            },
        );
        pack.metadata.namespace = Some("acme".into());
        pack
    }

    fn full_resolver(valid_pack: bool) -> StaticResolver {
        StaticResolver::default()
            .with_provider("acme", "openai-prod", provider())
            .with_pack("acme", "support-pack", pack(valid_pack))
            .with_config_map("acme", "support-pack-src", BTreeMap::new())
            .with_secret("acme", "llm-keys", &["openai"])
    }

    fn condition_tuple(c: &Condition) -> (String, ConditionStatus, String) {
        (c.condition_type.clone(), c.status, c.reason.clone())
    }

    #[tokio::test]
    async fn test_desired_state_when_everything_resolves() {
        let desired = compute_desired(&agent(None), &full_resolver(true), true)
            .await
            .unwrap();

        let conditions: Vec<_> = desired.conditions.iter().map(condition_tuple).collect();
        assert!(conditions.contains(&(
            "ProviderBound".into(),
            ConditionStatus::True,
            "Resolved".into()
        )));
        assert!(conditions.contains(&(
            "PackContentValid".into(),
            ConditionStatus::True,
            "Validated".into()
        )));
        assert!(conditions.contains(&("Ready".into(), ConditionStatus::True, "Running".into())));
        assert!(desired.config_hash.is_some());

        let deployment = desired.deployment.unwrap();
        let containers = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers
            .clone();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "facade");
        assert_eq!(containers[1].name, "runtime");
        let annotations = deployment.metadata.annotations.unwrap();
        assert_eq!(annotations["converge.dev/scale-min"], "1");
        assert_eq!(annotations["converge.dev/scale-max"], "4");
        assert_eq!(annotations["converge.dev/scale-trigger"], "activeConnections");
        assert!(desired.service.is_some());
    }

    #[tokio::test]
    async fn test_missing_provider_blocks_ready() {
        let resolver = StaticResolver::default()
            .with_pack("acme", "support-pack", pack(true))
            .with_config_map("acme", "support-pack-src", BTreeMap::new());
        let desired = compute_desired(&agent(None), &resolver, true).await.unwrap();

        let conditions: Vec<_> = desired.conditions.iter().map(condition_tuple).collect();
        assert!(conditions.contains(&(
            "ProviderBound".into(),
            ConditionStatus::False,
            "ProviderNotFound".into()
        )));
        assert!(conditions.contains(&("Ready".into(), ConditionStatus::False, "NotReady".into())));
        assert!(desired.deployment.is_none());
        assert!(desired.service.is_none());
        assert!(desired.config_hash.is_none());
    }

    #[tokio::test]
    async fn test_pack_warnings_downgrade_content_valid() {
        let desired = compute_desired(&agent(None), &full_resolver(false), true)
            .await
            .unwrap();
        let pack_condition = desired
            .conditions
            .iter()
            .find(|c| c.condition_type == "PackContentValid")
            .unwrap();
        assert_eq!(pack_condition.status, ConditionStatus::False);
        assert_eq!(pack_condition.reason, "ContentIssuesFound");
        assert!(desired.deployment.is_none());
    }

    #[tokio::test]
    async fn test_pod_not_ready_keeps_ready_false_but_renders_children() {
        let desired = compute_desired(&agent(None), &full_resolver(true), false)
            .await
            .unwrap();
        let ready = desired
            .conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert!(ready.message.contains("pod not ready"));
        assert!(desired.deployment.is_some());
    }

    #[tokio::test]
    async fn test_missing_tool_registry_blocks_ready() {
        let desired = compute_desired(&agent(Some("crm-tools")), &full_resolver(true), true)
            .await
            .unwrap();
        let ready = desired
            .conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert!(ready.message.contains("tool registry"));
    }

    #[tokio::test]
    async fn test_idempotent_desired_state() {
        let resolver = full_resolver(true).with_registry(
            "acme",
            "crm-tools",
            {
                let mut registry = ToolRegistry::new(
                    "crm-tools",
                    ToolRegistrySpec {
                        tools: vec![ToolSpec {
                            name: "crm".into(),
                            endpoint: "http://crm.acme.svc/api".into(),
                            handler_type: "http".into(),
                            auth: None,
                        }],
                    },
                );
                registry.metadata.namespace = Some("acme".into());
                registry
            },
        );
        let agent = agent(Some("crm-tools"));

        let first = compute_desired(&agent, &resolver, true).await.unwrap();
        let second = compute_desired(&agent, &resolver, true).await.unwrap();

        // Children and hashes are bit-identical across passes
        assert_eq!(first.config_hash, second.config_hash);
        assert_eq!(first.deployment, second.deployment);
        assert_eq!(first.service, second.service);
        // Conditions identical modulo the freshly stamped transition time
        let project =
            |cs: &[Condition]| cs.iter().map(condition_tuple).collect::<Vec<_>>();
        assert_eq!(project(&first.conditions), project(&second.conditions));
    }

    #[tokio::test]
    async fn test_config_hash_tracks_provider_changes() {
        let agent = agent(None);
        let first = compute_desired(&agent, &full_resolver(true), true)
            .await
            .unwrap();

        let mut changed_provider = provider();
        changed_provider.spec.model = "gpt-4o-mini".into();
        let resolver = StaticResolver::default()
            .with_provider("acme", "openai-prod", changed_provider)
            .with_pack("acme", "support-pack", pack(true))
            .with_config_map("acme", "support-pack-src", BTreeMap::new())
            .with_secret("acme", "llm-keys", &["openai"]);
        let second = compute_desired(&agent, &resolver, true).await.unwrap();

        assert_ne!(first.config_hash, second.config_hash);
    }
}
