// Read-only cross-kind lookup.
//
// Reconcilers never mutate objects of another kind; they read them through
// this interface. That breaks reference cycles between kinds and makes the
// desired-state computation testable without a cluster.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use converge_core::{CoreError, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};

use crate::resources::{PromptPack, Provider, ToolRegistry};

/// Read-only access to the kinds an AgentRuntime references.
#[async_trait]
pub trait RefResolver: Send + Sync {
    async fn provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>>;
    async fn prompt_pack(&self, namespace: &str, name: &str) -> Result<Option<PromptPack>>;
    async fn tool_registry(&self, namespace: &str, name: &str) -> Result<Option<ToolRegistry>>;
    /// Keys present in a Secret, without exposing the values.
    async fn secret_keys(&self, namespace: &str, name: &str) -> Result<Option<Vec<String>>>;
    /// Data entries of a ConfigMap.
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

fn api_err(e: kube::Error) -> CoreError {
    match &e {
        kube::Error::Api(response) if response.code == 404 => {
            CoreError::not_found(response.message.clone())
        }
        kube::Error::Api(response) if response.code == 409 => {
            CoreError::conflict(response.message.clone())
        }
        _ => CoreError::transient(format!("cluster api: {e}")),
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
        Err(e) => Err(api_err(e)),
    }
}

/// Cluster-backed resolver.
#[derive(Clone)]
pub struct KubeResolver {
    client: Client,
}

impl KubeResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RefResolver for KubeResolver {
    async fn provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn prompt_pack(&self, namespace: &str, name: &str) -> Result<Option<PromptPack>> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn tool_registry(&self, namespace: &str, name: &str) -> Result<Option<ToolRegistry>> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn secret_keys(&self, namespace: &str, name: &str) -> Result<Option<Vec<String>>> {
        let secret: Option<Secret> =
            get_opt(Api::namespaced(self.client.clone(), namespace), name).await?;
        Ok(secret.map(|s| {
            let mut keys: Vec<String> = s.data.unwrap_or_default().into_keys().collect();
            keys.extend(s.string_data.unwrap_or_default().into_keys());
            keys.sort();
            keys
        }))
    }

    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let config_map: Option<ConfigMap> =
            get_opt(Api::namespaced(self.client.clone(), namespace), name).await?;
        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }
}

/// Fixture-backed resolver for tests.
#[derive(Default)]
pub struct StaticResolver {
    pub providers: HashMap<(String, String), Provider>,
    pub packs: HashMap<(String, String), PromptPack>,
    pub registries: HashMap<(String, String), ToolRegistry>,
    pub secrets: HashMap<(String, String), Vec<String>>,
    pub config_maps: HashMap<(String, String), BTreeMap<String, String>>,
}

impl StaticResolver {
    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }

    pub fn with_provider(mut self, namespace: &str, name: &str, provider: Provider) -> Self {
        self.providers.insert(Self::key(namespace, name), provider);
        self
    }

    pub fn with_pack(mut self, namespace: &str, name: &str, pack: PromptPack) -> Self {
        self.packs.insert(Self::key(namespace, name), pack);
        self
    }

    pub fn with_registry(mut self, namespace: &str, name: &str, registry: ToolRegistry) -> Self {
        self.registries.insert(Self::key(namespace, name), registry);
        self
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, keys: &[&str]) -> Self {
        self.secrets.insert(
            Self::key(namespace, name),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    pub fn with_config_map(
        mut self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Self {
        self.config_maps.insert(Self::key(namespace, name), data);
        self
    }
}

#[async_trait]
impl RefResolver for StaticResolver {
    async fn provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>> {
        Ok(self.providers.get(&Self::key(namespace, name)).cloned())
    }

    async fn prompt_pack(&self, namespace: &str, name: &str) -> Result<Option<PromptPack>> {
        Ok(self.packs.get(&Self::key(namespace, name)).cloned())
    }

    async fn tool_registry(&self, namespace: &str, name: &str) -> Result<Option<ToolRegistry>> {
        Ok(self.registries.get(&Self::key(namespace, name)).cloned())
    }

    async fn secret_keys(&self, namespace: &str, name: &str) -> Result<Option<Vec<String>>> {
        Ok(self.secrets.get(&Self::key(namespace, name)).cloned())
    }

    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.config_maps.get(&Self::key(namespace, name)).cloned())
    }
}
