// Tagged-variant tier configuration and the registry factory.
//
// Each tier is optional; the factory instantiates whichever backends are
// configured and composes them into an immutable StorageRegistry.

use std::sync::Arc;
use std::time::Duration;

use converge_core::{CoreError, Result};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use serde::Deserialize;

use crate::cold::ObjectStoreArchive;
use crate::hot::{MemoryHotCache, RedisHotCache};
use crate::registry::StorageRegistry;
use crate::warm::{MemoryWarmStore, PostgresWarmStore};

/// Warm tier backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WarmConfig {
    Postgres { url: String },
    Memory,
}

/// Hot tier backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HotConfig {
    Memory {
        #[serde(default = "default_hot_capacity")]
        capacity: usize,
        #[serde(default = "default_idle_ttl_secs")]
        idle_ttl_secs: u64,
    },
    Redis {
        url: String,
        #[serde(default = "default_idle_ttl_secs")]
        idle_ttl_secs: u64,
    },
}

fn default_hot_capacity() -> usize {
    1024
}

fn default_idle_ttl_secs() -> u64 {
    900
}

/// Cold tier backend selection. Credentials for the cloud backends come
/// from the standard environment (IAM role, workload identity, etc.).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColdConfig {
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    Gcs {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    Azure {
        container: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    Local {
        path: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    Memory,
}

/// Full storage composition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub warm: Option<WarmConfig>,
    #[serde(default)]
    pub hot: Option<HotConfig>,
    #[serde(default)]
    pub cold: Option<ColdConfig>,
}

/// Instantiate the configured tiers and compose the registry.
pub async fn build_registry(config: StorageConfig) -> Result<StorageRegistry> {
    let warm = match config.warm {
        Some(WarmConfig::Postgres { url }) => Some(Arc::new(
            PostgresWarmStore::from_url(&url).await?,
        ) as Arc<dyn crate::warm::WarmStore>),
        Some(WarmConfig::Memory) => {
            Some(Arc::new(MemoryWarmStore::new()) as Arc<dyn crate::warm::WarmStore>)
        }
        None => None,
    };

    let hot = match config.hot {
        Some(HotConfig::Memory {
            capacity,
            idle_ttl_secs,
        }) => Some(Arc::new(MemoryHotCache::new(
            capacity,
            Duration::from_secs(idle_ttl_secs),
        )) as Arc<dyn crate::hot::HotCache>),
        Some(HotConfig::Redis { url, idle_ttl_secs }) => Some(Arc::new(
            RedisHotCache::connect(&url, Duration::from_secs(idle_ttl_secs)).await?,
        ) as Arc<dyn crate::hot::HotCache>),
        None => None,
    };

    let cold = match config.cold {
        Some(cold) => {
            let (store, prefix): (Arc<dyn ObjectStore>, Option<String>) = match cold {
                ColdConfig::S3 { bucket, prefix } => (
                    Arc::new(
                        AmazonS3Builder::from_env()
                            .with_bucket_name(&bucket)
                            .build()
                            .map_err(|e| CoreError::fatal(format!("s3 config: {e}")))?,
                    ),
                    prefix,
                ),
                ColdConfig::Gcs { bucket, prefix } => (
                    Arc::new(
                        GoogleCloudStorageBuilder::from_env()
                            .with_bucket_name(&bucket)
                            .build()
                            .map_err(|e| CoreError::fatal(format!("gcs config: {e}")))?,
                    ),
                    prefix,
                ),
                ColdConfig::Azure { container, prefix } => (
                    Arc::new(
                        MicrosoftAzureBuilder::from_env()
                            .with_container_name(&container)
                            .build()
                            .map_err(|e| CoreError::fatal(format!("azure config: {e}")))?,
                    ),
                    prefix,
                ),
                ColdConfig::Local { path, prefix } => (
                    Arc::new(
                        LocalFileSystem::new_with_prefix(&path)
                            .map_err(|e| CoreError::fatal(format!("local archive path: {e}")))?,
                    ),
                    prefix,
                ),
                ColdConfig::Memory => (Arc::new(InMemory::new()), None),
            };
            Some(Arc::new(ObjectStoreArchive::new(store, prefix))
                as Arc<dyn crate::cold::ColdArchive>)
        }
        None => None,
    };

    Ok(StorageRegistry::new(warm, hot, cold))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_parsing() {
        let raw = r#"
            {
                "warm": {"type": "memory"},
                "hot": {"type": "memory", "capacity": 64},
                "cold": {"type": "s3", "bucket": "converge-archive", "prefix": "prod"}
            }
        "#;
        let config: StorageConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(config.warm, Some(WarmConfig::Memory)));
        assert!(matches!(
            config.hot,
            Some(HotConfig::Memory { capacity: 64, .. })
        ));
        assert!(matches!(config.cold, Some(ColdConfig::S3 { .. })));
    }

    #[tokio::test]
    async fn test_build_partial_registry() {
        let registry = build_registry(StorageConfig {
            warm: Some(WarmConfig::Memory),
            hot: None,
            cold: Some(ColdConfig::Memory),
        })
        .await
        .unwrap();
        assert!(registry.has_warm());
        assert!(!registry.has_hot());
        assert!(registry.has_cold());
        assert!(registry.hot().is_err());
    }
}
