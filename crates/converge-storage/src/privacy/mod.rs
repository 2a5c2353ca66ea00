// Privacy engine: decorators on the storage write and read paths.
//
// Every write passes redact → encrypt before reaching the warm tier; every
// read of ciphertext passes decrypt. Consent checks gate recording
// entirely, and erasure requests fan out across all tiers.

pub mod consent;
pub mod encryption;
pub mod redaction;

use std::sync::Arc;

use converge_core::{CoreError, PrivacyPolicy, Result};

pub use consent::ConsentService;
pub use encryption::{
    generate_content_key, rotate_batch, spawn_rotation, ContentCipher, EnvKeySource, KeySource,
    RotationHandle,
};
pub use redaction::Redactor;

/// Composed write/read decorator built from one privacy policy.
pub struct PrivacyEngine {
    redactor: Option<Redactor>,
    cipher: Option<Arc<ContentCipher>>,
    encrypt: bool,
    records_facade: bool,
    records_rich_data: bool,
}

impl std::fmt::Debug for PrivacyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyEngine")
            .field("redactor", &self.redactor)
            .field("cipher", &self.cipher.is_some())
            .field("encrypt", &self.encrypt)
            .field("records_facade", &self.records_facade)
            .field("records_rich_data", &self.records_rich_data)
            .finish()
    }
}

impl PrivacyEngine {
    /// Engine that records everything verbatim (no policy configured).
    pub fn disabled() -> Self {
        Self {
            redactor: None,
            cipher: None,
            encrypt: false,
            records_facade: true,
            records_rich_data: true,
        }
    }

    pub fn from_policy(policy: &PrivacyPolicy, cipher: Option<Arc<ContentCipher>>) -> Result<Self> {
        policy.validate()?;
        let redactor = policy
            .pii
            .as_ref()
            .map(Redactor::from_settings)
            .transpose()?;
        let encrypt = policy.encryption.enabled
            || policy.pii.as_ref().map(|p| p.encrypt).unwrap_or(false);
        if encrypt && cipher.is_none() {
            return Err(CoreError::fatal(
                "policy requires encryption but no content key is configured",
            ));
        }
        Ok(Self {
            redactor,
            cipher,
            encrypt,
            records_facade: policy.recording.facade,
            records_rich_data: policy.recording.rich_data,
        })
    }

    /// Whether facade transcripts should be persisted at all.
    pub fn records_facade(&self) -> bool {
        self.records_facade
    }

    /// Whether tool payloads and other rich data should be persisted.
    pub fn records_rich_data(&self) -> bool {
        self.records_rich_data
    }

    /// Write path: redact, then encrypt. Returns the storable content and
    /// the key version when encrypted. The original text is gone after
    /// this call.
    pub fn seal(&self, content: &str) -> Result<(String, Option<String>)> {
        let sanitized = match &self.redactor {
            Some(redactor) => redactor.redact(content),
            None => content.to_string(),
        };
        if self.encrypt {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| CoreError::fatal("content cipher missing"))?;
            let (payload, version) = cipher.encrypt_content(&sanitized)?;
            Ok((payload, Some(version)))
        } else {
            Ok((sanitized, None))
        }
    }

    /// Read path: decrypt ciphertext content. Plaintext rows pass through.
    pub fn open(&self, content: &str, key_version: Option<&str>) -> Result<String> {
        match key_version {
            None => Ok(content.to_string()),
            Some(version) => {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    CoreError::key_unavailable(format!("no key for version {version}"))
                })?;
                cipher.decrypt_content(content)
            }
        }
    }
}
