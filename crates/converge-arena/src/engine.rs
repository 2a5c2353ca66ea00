// Direct-mode execution engine.
//
// Builds provider/prompt/tool registries from the cluster-resolved
// provider bindings the controller stamped onto each work item, plus the
// bundle's tool catalog. Credential resolution happens before engine
// construction so a missing secret short-circuits as a failed result
// instead of burning retries.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use converge_core::{
    AssertionResult, CoreError, CredentialSource, ExecutionMetrics, ExecutionResult,
    ExecutionStatus, ProviderBinding, ProviderType, Result,
};
use serde_json::json;

use crate::config::{Assertion, ScenarioSpec, ToolDescriptor};

/// Chat turn passed to a provider.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

/// The provider abstraction the engine drives. The real LLM protocols
/// live behind this seam.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn id(&self) -> &str;
    async fn complete(&self, history: &[ChatTurn]) -> Result<String>;
}

/// Deterministic provider for tests and dry runs.
pub struct MockProvider {
    id: String,
    model: String,
}

impl MockProvider {
    pub fn new(binding: &ProviderBinding) -> Self {
        Self {
            id: binding.id.clone(),
            model: binding.model.clone(),
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, history: &[ChatTurn]) -> Result<String> {
        let last_user = history
            .iter()
            .rev()
            .find(|t| t.role == "user")
            .map(|t| t.content.as_str())
            .unwrap_or_default();
        Ok(format!("[{}] I hear you: {last_user}", self.model))
    }
}

/// OpenAI-compatible HTTP provider; also covers Ollama's compatibility
/// endpoint. Everything protocol-specific stays in this one impl.
pub struct HttpChatProvider {
    id: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChatProvider {
    pub fn new(binding: &ProviderBinding, api_key: Option<String>) -> Self {
        let base_url = binding
            .base_url
            .clone()
            .unwrap_or_else(|| match binding.provider_type {
                ProviderType::Ollama => "http://localhost:11434/v1".to_string(),
                _ => "https://api.openai.com/v1".to_string(),
            });
        Self {
            id: binding.id.clone(),
            model: binding.model.clone(),
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, history: &[ChatTurn]) -> Result<String> {
        let messages: Vec<_> = history
            .iter()
            .map(|t| json!({ "role": t.role, "content": t.content }))
            .collect();
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({ "model": self.model, "messages": messages }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("provider request: {e}")))?
            .error_for_status()
            .map_err(|e| CoreError::transient(format!("provider response: {e}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::transient(format!("provider body: {e}")))?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::transient("provider returned no content"))
    }
}

/// Resolve a binding's credential from its configured source. The
/// `secrets_dir` maps InlineSecretRef to files mounted by the worker pod.
pub fn resolve_credential(
    binding: &ProviderBinding,
    secrets_dir: Option<&Path>,
) -> Result<Option<String>> {
    let Some(source) = &binding.credential else {
        if binding.provider_type.requires_credentials() {
            return Err(CoreError::fatal(format!(
                "provider {} has no credential configured",
                binding.id
            )));
        }
        return Ok(None);
    };
    let value = match source {
        CredentialSource::EnvVar { name } => std::env::var(name).map_err(|_| {
            CoreError::fatal(format!("credential env var {name} not set for {}", binding.id))
        })?,
        CredentialSource::File { path } => std::fs::read_to_string(path)
            .map_err(|e| {
                CoreError::fatal(format!("credential file {path} unreadable for {}: {e}", binding.id))
            })?
            .trim()
            .to_string(),
        CredentialSource::InlineSecretRef { name, key } => {
            let base = secrets_dir.ok_or_else(|| {
                CoreError::fatal(format!("no secrets mount for provider {}", binding.id))
            })?;
            let path = base.join(name).join(key);
            std::fs::read_to_string(&path)
                .map_err(|e| {
                    CoreError::fatal(format!(
                        "secret {}/{key} unreadable for {}: {e}",
                        name, binding.id
                    ))
                })?
                .trim()
                .to_string()
        }
    };
    Ok(Some(value))
}

/// Build one provider client from its binding.
pub fn build_provider(
    binding: &ProviderBinding,
    secrets_dir: Option<&Path>,
) -> Result<Arc<dyn ChatProvider>> {
    binding.validate()?;
    let credential = resolve_credential(binding, secrets_dir)?;
    Ok(match binding.provider_type {
        ProviderType::Mock => Arc::new(MockProvider::new(binding)),
        _ => Arc::new(HttpChatProvider::new(binding, credential)),
    })
}

/// In-process engine: registries plus the run-plan executor.
pub struct DirectEngine {
    providers: BTreeMap<String, Arc<dyn ChatProvider>>,
    #[allow(dead_code)] // tool dispatch is carried to the runtime container
    tools: Vec<ToolDescriptor>,
}

impl std::fmt::Debug for DirectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectEngine")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("tools", &self.tools)
            .finish()
    }
}

impl DirectEngine {
    /// Construct registries from resolved provider bindings. Fails fast on
    /// missing credentials, before any scenario is touched.
    pub fn from_bindings(
        bindings: &[ProviderBinding],
        tools: Vec<ToolDescriptor>,
        secrets_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut providers = BTreeMap::new();
        for binding in bindings {
            providers.insert(binding.id.clone(), build_provider(binding, secrets_dir)?);
        }
        Ok(Self { providers, tools })
    }

    /// Run one scenario against one provider. A scenario with no turns is
    /// a pass with zero runs.
    pub async fn execute(
        &self,
        scenario: &ScenarioSpec,
        provider_id: &str,
    ) -> Result<ExecutionResult> {
        let provider = self.providers.get(provider_id).ok_or_else(|| {
            CoreError::validation(format!("provider {provider_id} not in registry"))
        })?;
        if scenario.turns.is_empty() {
            return Ok(ExecutionResult::empty_pass());
        }

        let start = Instant::now();
        let mut history: Vec<ChatTurn> = vec![];
        let mut assertions = vec![];
        let mut metrics = ExecutionMetrics::default();

        for turn in &scenario.turns {
            let turn_start = Instant::now();
            history.push(ChatTurn {
                role: "user",
                content: turn.user.clone(),
            });
            let reply = provider.complete(&history).await?;
            history.push(ChatTurn {
                role: "assistant",
                content: reply.clone(),
            });

            let mut turn_passed = true;
            for assertion in &turn.expect {
                let outcome = evaluate_assertion(assertion, &reply)?;
                turn_passed &= outcome.passed;
                assertions.push(outcome);
            }
            metrics.runs_executed += 1;
            if turn_passed {
                metrics.runs_passed += 1;
            } else {
                metrics.runs_failed += 1;
            }
            metrics.total_duration_ms += turn_start.elapsed().as_millis() as u64;
        }

        Ok(ExecutionResult {
            status: ExecutionStatus::Pass,
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
            metrics,
            assertions,
            transcript: None,
        }
        .finalize())
    }
}

/// Evaluate one assertion against an assistant reply.
pub fn evaluate_assertion(assertion: &Assertion, reply: &str) -> Result<AssertionResult> {
    let (passed, message) = match assertion {
        Assertion::Contains { value, .. } => (
            reply.contains(value.as_str()),
            format!("expected reply to contain {value:?}"),
        ),
        Assertion::NotContains { value, .. } => (
            !reply.contains(value.as_str()),
            format!("expected reply not to contain {value:?}"),
        ),
        Assertion::Matches { pattern, .. } => {
            let regex = regex::Regex::new(pattern).map_err(|e| {
                CoreError::validation(format!("invalid assertion pattern {pattern}: {e}"))
            })?;
            (
                regex.is_match(reply),
                format!("expected reply to match /{pattern}/"),
            )
        }
    };
    Ok(AssertionResult {
        name: assertion.name().to_string(),
        passed,
        message: if passed { String::new() } else { message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnSpec;
    use converge_core::ProviderDefaults;

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

    fn scenario(expect: Vec<Assertion>) -> ScenarioSpec {
        ScenarioSpec {
            id: "greeting".into(),
            description: None,
            turns: vec![TurnSpec {
                user: "I was double charged".into(),
                expect,
            }],
        }
    }

    #[tokio::test]
    async fn test_passing_run() {
        let engine = DirectEngine::from_bindings(&[mock_binding("m1")], vec![], None).unwrap();
        let result = engine
            .execute(
                &scenario(vec![Assertion::Contains {
                    name: "echo".into(),
                    value: "double charged".into(),
                }]),
                "m1",
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Pass);
        assert_eq!(result.metrics.runs_executed, 1);
        assert_eq!(result.metrics.runs_passed, 1);
        assert!(result.assertions.iter().all(|a| a.passed));
    }

    #[tokio::test]
    async fn test_failed_assertion_fails_run() {
        let engine = DirectEngine::from_bindings(&[mock_binding("m1")], vec![], None).unwrap();
        let result = engine
            .execute(
                &scenario(vec![Assertion::Contains {
                    name: "refund".into(),
                    value: "refund issued".into(),
                }]),
                "m1",
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Fail);
        assert_eq!(result.metrics.runs_failed, 1);
        assert!(!result.assertions[0].passed);
        assert!(!result.assertions[0].message.is_empty());
    }

    #[tokio::test]
    async fn test_empty_scenario_passes_with_zero_runs() {
        let engine = DirectEngine::from_bindings(&[mock_binding("m1")], vec![], None).unwrap();
        let result = engine
            .execute(
                &ScenarioSpec {
                    id: "empty".into(),
                    description: None,
                    turns: vec![],
                },
                "m1",
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Pass);
        assert_eq!(result.metrics.runs_executed, 0);
    }

    #[test]
    fn test_missing_credential_fails_before_construction() {
        let mut binding = mock_binding("openai-1");
        binding.provider_type = ProviderType::Openai;
        binding.credential = Some(CredentialSource::EnvVar {
            name: "DEFINITELY_NOT_SET_FOR_TESTS".into(),
        });
        let err = DirectEngine::from_bindings(&[binding], vec![], None).unwrap_err();
        assert!(matches!(err, CoreError::Fatal(_)));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let engine = DirectEngine::from_bindings(&[mock_binding("m1")], vec![], None).unwrap();
        let err = futures::executor::block_on(engine.execute(&scenario(vec![]), "ghost"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_assertion_kinds() {
        let reply = "We are sorry about the double charge.";
        let contains = evaluate_assertion(
            &Assertion::Contains {
                name: "apology".into(),
                value: "sorry".into(),
            },
            reply,
        )
        .unwrap();
        assert!(contains.passed);

        let not_contains = evaluate_assertion(
            &Assertion::NotContains {
                name: "no-refund-claim".into(),
                value: "refund has been issued".into(),
            },
            reply,
        )
        .unwrap();
        assert!(not_contains.passed);

        let matches = evaluate_assertion(
            &Assertion::Matches {
                name: "sentence".into(),
                pattern: r"sorry.*charge".into(),
            },
            reply,
        )
        .unwrap();
        assert!(matches.passed);

        assert!(evaluate_assertion(
            &Assertion::Matches {
                name: "bad".into(),
                pattern: "(".into(),
            },
            reply,
        )
        .is_err());
    }
}
