// LLM provider binding types.
//
// A Provider ties a model name to a credential source and request
// defaults. The wire protocols themselves live behind the runtime images;
// this crate only classifies and validates the binding.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Supported provider families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Openai,
    Claude,
    Bedrock,
    Vertex,
    Mock,
    Ollama,
}

impl ProviderType {
    /// Mock and local providers run without credentials.
    pub fn requires_credentials(&self) -> bool {
        !matches!(self, ProviderType::Mock | ProviderType::Ollama)
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderType::Openai => "openai",
            ProviderType::Claude => "claude",
            ProviderType::Bedrock => "bedrock",
            ProviderType::Vertex => "vertex",
            ProviderType::Mock => "mock",
            ProviderType::Ollama => "ollama",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProviderType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(ProviderType::Openai),
            "claude" => Ok(ProviderType::Claude),
            "bedrock" => Ok(ProviderType::Bedrock),
            "vertex" => Ok(ProviderType::Vertex),
            "mock" => Ok(ProviderType::Mock),
            "ollama" => Ok(ProviderType::Ollama),
            other => Err(CoreError::validation(format!(
                "unknown provider type: {other}"
            ))),
        }
    }
}

/// Where a provider credential comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CredentialSource {
    /// Environment variable in the runtime container
    EnvVar { name: String },
    /// Mounted file path
    File { path: String },
    /// Key inside a Kubernetes Secret
    InlineSecretRef { name: String, key: String },
}

/// Request defaults applied when a session does not override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// An LLM credential/config binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBinding {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialSource>,
    #[serde(default)]
    pub defaults: ProviderDefaults,
}

impl ProviderBinding {
    /// Credential must be present iff the provider type requires one.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(CoreError::validation("provider model must not be empty"));
        }
        match (self.provider_type.requires_credentials(), &self.credential) {
            (true, None) => Err(CoreError::validation(format!(
                "provider type {} requires a credential",
                self.provider_type
            ))),
            (false, Some(_)) => Err(CoreError::validation(format!(
                "provider type {} does not take a credential",
                self.provider_type
            ))),
            _ => Ok(()),
        }
    }
}
