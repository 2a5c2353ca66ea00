// Declared kinds of the platform.
//
// Six custom resources: AgentRuntime (the agent deployment), PromptPack,
// ToolRegistry, Provider, Workspace, and SessionRetentionPolicy. Cross
// references resolve within the same workspace namespace, or cluster-wide
// for cluster-scoped kinds.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conditions::Condition;

// ============================================
// AgentRuntime
// ============================================

/// Reference to another object in the same namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct LocalRef {
    pub name: String,
}

/// Client-facing frontend of the agent pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacadeSpec {
    /// Frontend protocol (currently `websocket`)
    #[serde(default = "default_facade_type")]
    pub facade_type: String,
    #[serde(default = "default_facade_port")]
    pub port: i32,
}

fn default_facade_type() -> String {
    "websocket".to_string()
}

fn default_facade_port() -> i32 {
    8081
}

impl Default for FacadeSpec {
    fn default() -> Self {
        Self {
            facade_type: default_facade_type(),
            port: default_facade_port(),
        }
    }
}

/// Replica bounds keyed on a scaling trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ScalingSpec {
    #[serde(default = "default_scaling_min")]
    pub min: i32,
    #[serde(default = "default_scaling_max")]
    pub max: i32,
    /// Scaling signal (`activeConnections` by default)
    #[serde(default = "default_scaling_trigger")]
    pub trigger: String,
}

fn default_scaling_min() -> i32 {
    1
}
fn default_scaling_max() -> i32 {
    4
}
fn default_scaling_trigger() -> String {
    "activeConnections".to_string()
}

impl Default for ScalingSpec {
    fn default() -> Self {
        Self {
            min: default_scaling_min(),
            max: default_scaling_max(),
            trigger: default_scaling_trigger(),
        }
    }
}

/// One declared conversational agent: a facade + runtime pod pair, a
/// Service, and scaling metadata.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "AgentRuntime",
    namespaced,
    status = "AgentRuntimeStatus",
    shortname = "agent",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeSpec {
    pub prompt_pack_ref: LocalRef,
    pub provider_ref: LocalRef,
    #[serde(default)]
    pub tool_registry_ref: Option<LocalRef>,
    #[serde(default)]
    pub facade: FacadeSpec,
    #[serde(default)]
    pub scaling: ScalingSpec,
    /// Facade container image
    #[serde(default)]
    pub facade_image: Option<String>,
    /// Runtime container image
    #[serde(default)]
    pub runtime_image: Option<String>,
}

/// AgentRuntime lifecycle phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum AgentPhase {
    #[default]
    Pending,
    Starting,
    Ready,
    Degraded,
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentRuntimeStatus {
    #[serde(default)]
    pub phase: AgentPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Hash of the rendered configuration bundle
    #[serde(default)]
    pub config_hash: Option<String>,
}

// ============================================
// PromptPack
// ============================================

/// Where the pack content comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PackSource {
    ConfigMap { name: String },
    Git { repository: String, revision: String },
    Oci { image: String },
}

/// One named prompt template with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct PromptTemplate {
    pub template: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// A versioned, content-addressed bundle of compiled prompts.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "PromptPack",
    namespaced,
    status = "PromptPackStatus",
    shortname = "pack"
)]
#[serde(rename_all = "camelCase")]
pub struct PromptPackSpec {
    /// Semver; immutable per pack id
    pub version: String,
    pub source: PackSource,
    /// Inline prompts (also the compiled form for configMap sources)
    #[serde(default)]
    pub prompts: BTreeMap<String, PromptTemplate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptPackStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// sha256 of the compiled JSON
    #[serde(default)]
    pub content_hash: Option<String>,
}

// ============================================
// ToolRegistry
// ============================================

/// One tool endpoint a runtime may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub endpoint: String,
    /// http, grpc, or mcp
    #[serde(default = "default_tool_handler")]
    pub handler_type: String,
    #[serde(default)]
    pub auth: Option<ToolAuth>,
}

fn default_tool_handler() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolAuth {
    pub secret_ref: LocalRef,
    pub key: String,
}

/// A set of tool descriptors exposed to agents.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "ToolRegistry",
    namespaced,
    status = "ToolRegistryStatus",
    shortname = "tools"
)]
pub struct ToolRegistrySpec {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolRegistryStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

// ============================================
// Provider
// ============================================

/// Key inside a Secret in the same namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Request defaults applied when a session does not override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDefaultsSpec {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// An LLM credential binding.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Provider",
    namespaced,
    status = "ProviderStatus",
    shortname = "prov"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// openai, claude, bedrock, vertex, mock, ollama
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Required iff the provider type needs credentials
    #[serde(default)]
    pub credential_secret_ref: Option<SecretKeyRef>,
    #[serde(default)]
    pub defaults: ProviderDefaultsSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

// ============================================
// Workspace
// ============================================

/// A multi-tenant boundary; its name is the namespace it governs.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "Workspace",
    status = "WorkspaceStatus",
    shortname = "ws"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    #[serde(default)]
    pub storage_class: Option<String>,
    /// Resource quota hard limits (cpu, memory, pods, ...)
    #[serde(default)]
    pub quotas: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

// ============================================
// SessionRetentionPolicy
// ============================================

/// Policy scope, most specific wins: agent > workspace > global.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RetentionScope {
    #[default]
    Global,
    Workspace,
    Agent,
}

/// Tiering thresholds for session data.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "converge.dev",
    version = "v1alpha1",
    kind = "SessionRetentionPolicy",
    status = "SessionRetentionPolicyStatus",
    shortname = "retention"
)]
#[serde(rename_all = "camelCase")]
pub struct SessionRetentionPolicySpec {
    #[serde(default)]
    pub scope: RetentionScope,
    /// Required for workspace and agent scopes
    #[serde(default)]
    pub workspace: Option<String>,
    /// Required for agent scope
    #[serde(default)]
    pub agent: Option<String>,
    pub warm_days: u32,
    pub cold_days: u32,
    pub purge_after_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRetentionPolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_spec_defaults() {
        let raw = serde_json::json!({
            "promptPackRef": {"name": "support-pack"},
            "providerRef": {"name": "openai-prod"}
        });
        let spec: AgentRuntimeSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.facade.facade_type, "websocket");
        assert_eq!(spec.facade.port, 8081);
        assert_eq!(spec.scaling.min, 1);
        assert_eq!(spec.scaling.max, 4);
        assert_eq!(spec.scaling.trigger, "activeConnections");
        assert!(spec.tool_registry_ref.is_none());
    }

    #[test]
    fn test_provider_spec_wire_shape() {
        let raw = serde_json::json!({
            "type": "claude",
            "model": "claude-sonnet",
            "credentialSecretRef": {"name": "llm-keys", "key": "anthropic"}
        });
        let spec: ProviderSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.provider_type, "claude");
        assert_eq!(spec.credential_secret_ref.unwrap().key, "anthropic");
    }

    #[test]
    fn test_pack_source_variants() {
        let git: PackSource = serde_json::from_value(serde_json::json!({
            "git": {"repository": "https://github.com/acme/packs", "revision": "v1.2.0"}
        }))
        .unwrap();
        assert!(matches!(git, PackSource::Git { .. }));

        let cm: PackSource =
            serde_json::from_value(serde_json::json!({"configMap": {"name": "support-pack"}}))
                .unwrap();
        assert!(matches!(cm, PackSource::ConfigMap { .. }));
    }

    #[test]
    fn test_retention_policy_spec() {
        let raw = serde_json::json!({
            "scope": "agent",
            "workspace": "acme",
            "agent": "support-bot",
            "warmDays": 7,
            "coldDays": 30,
            "purgeAfterDays": 90
        });
        let spec: SessionRetentionPolicySpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.scope, RetentionScope::Agent);
        assert_eq!(spec.warm_days, 7);
    }
}
