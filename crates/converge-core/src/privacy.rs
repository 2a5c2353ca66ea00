// Privacy policy model: recording toggles, PII handling, encryption at
// rest, and user opt-out.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::retention::PolicyScope;

/// What gets persisted at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingSettings {
    /// Record facade transcripts
    pub facade: bool,
    /// Record tool payloads and other rich data
    pub rich_data: bool,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            facade: true,
            rich_data: true,
        }
    }
}

/// How detected PII is rewritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PiiStrategy {
    /// `[REDACTED_<KIND>]`
    Replace,
    /// Truncated SHA-256 of the match
    Hash,
    /// All but the last 4 characters obscured
    Mask,
}

/// PII detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PiiSettings {
    /// Built-in pattern names (ssn, credit_card, phone, email, ip) and
    /// user regexes prefixed `custom:`
    #[serde(default)]
    pub patterns: Vec<String>,
    pub strategy: PiiStrategy,
    /// Additionally encrypt the sanitized content
    #[serde(default)]
    pub encrypt: bool,
}

/// Encryption-at-rest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub enabled: bool,
    /// KMS backend (aws-kms, azure-kv, gcp-kms, vault, env)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Cron expression for key rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<String>,
}

/// Per-user opt-out configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptOutSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Deadline for fulfilling erasure requests
    #[serde(default = "default_delete_within_days")]
    pub delete_within_days: u32,
}

fn default_delete_within_days() -> u32 {
    30
}

/// Full privacy policy for a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivacyPolicy {
    #[serde(flatten)]
    pub scope: PolicyScope,
    #[serde(default)]
    pub recording: RecordingSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<PiiSettings>,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub user_opt_out: OptOutSettings,
}

impl PrivacyPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.encryption.enabled {
            if self.encryption.kms_provider.is_none() {
                return Err(CoreError::validation(
                    "encryption.kmsProvider required when encryption is enabled",
                ));
            }
            if self.encryption.key_id.is_none() {
                return Err(CoreError::validation(
                    "encryption.keyId required when encryption is enabled",
                ));
            }
        }
        if let Some(pii) = &self.pii {
            for pattern in &pii.patterns {
                let known_builtin = matches!(
                    pattern.as_str(),
                    "ssn" | "credit_card" | "phone" | "email" | "ip"
                );
                if !known_builtin && !pattern.starts_with("custom:") {
                    return Err(CoreError::validation(format!(
                        "unknown pii pattern: {pattern}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PrivacyPolicy {
        PrivacyPolicy {
            scope: PolicyScope::Global,
            recording: RecordingSettings::default(),
            pii: Some(PiiSettings {
                patterns: vec!["ssn".into(), "email".into()],
                strategy: PiiStrategy::Mask,
                encrypt: false,
            }),
            encryption: EncryptionSettings::default(),
            user_opt_out: OptOutSettings::default(),
        }
    }

    #[test]
    fn test_valid_policy() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn test_encryption_requires_kms_and_key() {
        let mut p = policy();
        p.encryption.enabled = true;
        assert!(p.validate().is_err());

        p.encryption.kms_provider = Some("vault".into());
        assert!(p.validate().is_err());

        p.encryption.key_id = Some("kek-v1".into());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        let mut p = policy();
        p.pii.as_mut().unwrap().patterns.push("passport".into());
        assert!(p.validate().is_err());

        // Custom-prefixed patterns are accepted
        let mut p = policy();
        p.pii
            .as_mut()
            .unwrap()
            .patterns
            .push("custom:ACC-\\d{8}".into());
        assert!(p.validate().is_ok());
    }
}
