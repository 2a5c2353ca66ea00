// Provider resolution against the cluster.
//
// Arena jobs exercise the same Provider resources the operator manages:
// `providerOverrides` entries are label selectors over Provider CRs in the
// job's workspace namespace, with `"*"` as catch-all. Each selected CR is
// converted to the engine's binding form; credentials stay as secret
// references that the worker resolves from its mounted secrets.

use std::collections::BTreeMap;

use async_trait::async_trait;
use converge_core::{
    CoreError, CredentialSource, ProviderBinding, ProviderDefaults, ProviderType, Result,
};
use converge_operator::resources::Provider;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

/// Catch-all selector.
pub const SELECT_ALL: &str = "*";

/// Read-only access to the Provider CRs of one namespace.
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// Providers matching a label selector; an empty selector matches the
    /// whole namespace.
    async fn select(&self, namespace: &str, selector: &str) -> Result<Vec<ProviderBinding>>;
}

/// Convert one Provider CR to the binding form workers consume.
pub fn binding_from_provider(provider: &Provider) -> Result<ProviderBinding> {
    let name = provider.name_any();
    let provider_type: ProviderType = provider
        .spec
        .provider_type
        .parse()
        .map_err(|e: CoreError| CoreError::validation(format!("provider {name}: {e}")))?;
    let binding = ProviderBinding {
        id: name.clone(),
        provider_type,
        model: provider.spec.model.clone(),
        base_url: provider.spec.base_url.clone(),
        credential: provider.spec.credential_secret_ref.as_ref().map(|r| {
            CredentialSource::InlineSecretRef {
                name: r.name.clone(),
                key: r.key.clone(),
            }
        }),
        defaults: ProviderDefaults {
            temperature: provider.spec.defaults.temperature,
            top_p: provider.spec.defaults.top_p,
            max_tokens: provider.spec.defaults.max_tokens,
        },
    };
    binding
        .validate()
        .map_err(|e| CoreError::validation(format!("provider {name}: {e}")))?;
    Ok(binding)
}

/// Cluster-backed catalog.
#[derive(Clone)]
pub struct KubeProviderCatalog {
    client: Client,
}

impl KubeProviderCatalog {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderCatalog for KubeProviderCatalog {
    async fn select(&self, namespace: &str, selector: &str) -> Result<Vec<ProviderBinding>> {
        let api: Api<Provider> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let providers = api
            .list(&params)
            .await
            .map_err(|e| CoreError::transient(format!("provider list: {e}")))?;
        providers.items.iter().map(binding_from_provider).collect()
    }
}

/// Fixture-backed catalog for tests: bindings tagged with label maps,
/// matched by comma-separated `key=value` equality selectors.
#[derive(Default)]
pub struct StaticProviderCatalog {
    entries: Vec<(BTreeMap<String, String>, ProviderBinding)>,
}

impl StaticProviderCatalog {
    pub fn with(mut self, labels: &[(&str, &str)], binding: ProviderBinding) -> Self {
        self.entries.push((
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            binding,
        ));
        self
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> Result<bool> {
    if selector.is_empty() {
        return Ok(true);
    }
    for requirement in selector.split(',') {
        let (key, value) = requirement
            .split_once('=')
            .ok_or_else(|| CoreError::validation(format!("invalid selector {selector:?}")))?;
        if labels.get(key.trim()).map(String::as_str) != Some(value.trim()) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl ProviderCatalog for StaticProviderCatalog {
    async fn select(&self, _namespace: &str, selector: &str) -> Result<Vec<ProviderBinding>> {
        let mut selected = vec![];
        for (labels, binding) in &self.entries {
            if matches_selector(labels, selector)? {
                selected.push(binding.clone());
            }
        }
        Ok(selected)
    }
}

/// Resolve the job's provider set.
///
/// Empty overrides, or any `"*"` entry, select every provider in the
/// namespace; otherwise the union of all selector matches. Resolution must
/// produce at least one provider, keyed by id in stable order.
pub async fn resolve_providers(
    catalog: &dyn ProviderCatalog,
    namespace: &str,
    overrides: &[String],
) -> Result<Vec<ProviderBinding>> {
    let selectors: Vec<&str> =
        if overrides.is_empty() || overrides.iter().any(|s| s == SELECT_ALL) {
            vec![""]
        } else {
            overrides.iter().map(String::as_str).collect()
        };

    let mut selected: BTreeMap<String, ProviderBinding> = BTreeMap::new();
    for selector in selectors {
        for binding in catalog.select(namespace, selector).await? {
            selected.insert(binding.id.clone(), binding);
        }
    }
    if selected.is_empty() {
        return Err(CoreError::validation(format!(
            "no providers resolved in namespace {namespace} for {overrides:?}"
        )));
    }
    Ok(selected.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_operator::resources::{ProviderDefaultsSpec, ProviderSpec, SecretKeyRef};

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

    fn provider_cr(name: &str, provider_type: &str, secret: Option<SecretKeyRef>) -> Provider {
        let mut provider = Provider::new(
            name,
            ProviderSpec {
                provider_type: provider_type.into(),
                model: "gpt-4o".into(),
                base_url: Some("https://llm.acme.io/v1".into()),
                credential_secret_ref: secret,
                defaults: ProviderDefaultsSpec {
                    temperature: Some(0.2),
                    top_p: None,
                    max_tokens: Some(2048),
                },
            },
        );
        provider.metadata.namespace = Some("acme".into());
        provider
    }

    #[test]
    fn test_binding_from_provider_cr() {
        let cr = provider_cr(
            "openai-prod",
            "openai",
            Some(SecretKeyRef {
                name: "llm-keys".into(),
                key: "openai".into(),
            }),
        );
        let binding = binding_from_provider(&cr).unwrap();
        assert_eq!(binding.id, "openai-prod");
        assert_eq!(binding.provider_type, ProviderType::Openai);
        assert_eq!(binding.base_url.as_deref(), Some("https://llm.acme.io/v1"));
        assert_eq!(binding.defaults.temperature, Some(0.2));
        assert!(matches!(
            binding.credential,
            Some(CredentialSource::InlineSecretRef { .. })
        ));
    }

    #[test]
    fn test_binding_conversion_rejects_bad_specs() {
        // Unknown type
        let err = binding_from_provider(&provider_cr("p", "palm", None)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        // Credential-requiring type without a secret fails the binding
        // invariant rather than reaching a worker
        let err = binding_from_provider(&provider_cr("p", "openai", None)).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_label_selector_resolution() {
        let catalog = StaticProviderCatalog::default()
            .with(&[("tier", "fast"), ("vendor", "mock")], mock_binding("mock-fast"))
            .with(&[("tier", "slow"), ("vendor", "mock")], mock_binding("mock-slow"))
            .with(&[("tier", "fast"), ("vendor", "echo")], mock_binding("echo-fast"));

        // Catch-all forms
        let all = resolve_providers(&catalog, "acme", &[]).await.unwrap();
        assert_eq!(all.len(), 3);
        let star = resolve_providers(&catalog, "acme", &["*".to_string()])
            .await
            .unwrap();
        assert_eq!(star.len(), 3);

        // Single selector
        let fast = resolve_providers(&catalog, "acme", &["tier=fast".to_string()])
            .await
            .unwrap();
        assert_eq!(fast.len(), 2);

        // Conjunctive requirements
        let fast_mock =
            resolve_providers(&catalog, "acme", &["tier=fast,vendor=mock".to_string()])
                .await
                .unwrap();
        assert_eq!(fast_mock.len(), 1);
        assert_eq!(fast_mock[0].id, "mock-fast");

        // Union of selectors, deduplicated by id
        let union = resolve_providers(
            &catalog,
            "acme",
            &["tier=fast".to_string(), "vendor=mock".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(union.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_resolution_is_an_error() {
        let catalog = StaticProviderCatalog::default();
        let err = resolve_providers(&catalog, "acme", &[]).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let catalog =
            StaticProviderCatalog::default().with(&[("tier", "fast")], mock_binding("m"));
        let err = resolve_providers(&catalog, "acme", &["tier=turbo".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_malformed_selector_rejected() {
        let catalog =
            StaticProviderCatalog::default().with(&[("tier", "fast")], mock_binding("m"));
        let err = resolve_providers(&catalog, "acme", &["tier".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
