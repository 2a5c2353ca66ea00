// Content encryption at rest with versioned keys.
//
// AES-256-GCM over message content; the payload records which key version
// produced it so rotation can find stale rows cheaply. Keys come from a
// KeySource (environment, file; KMS backends plug in at the same seam).
// Decrypting with a missing key is a hard KeyUnavailable error, never a
// silent degrade.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use converge_core::{CoreError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::warm::WarmStore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const PAYLOAD_VERSION: u8 = 1;
const ALGORITHM: &str = "AES-256-GCM";

/// Bounds on rotation batch sizes.
pub const ROTATION_BATCH_MIN: usize = 1;
pub const ROTATION_BATCH_MAX: usize = 1000;

/// Encrypted content as stored in the warm tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherEnvelope {
    pub v: u8,
    pub alg: String,
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Supplies versioned keys in `key_id:base64` form. The first key is
/// primary (used for new encryptions); the rest remain available for
/// decryption during rotation windows.
pub trait KeySource: Send + Sync {
    fn primary(&self) -> Result<String>;
    fn previous(&self) -> Vec<String>;
}

/// Keys from environment variables.
pub struct EnvKeySource {
    pub primary_var: String,
    pub previous_var: String,
}

impl Default for EnvKeySource {
    fn default() -> Self {
        Self {
            primary_var: "CONTENT_ENCRYPTION_KEY".into(),
            previous_var: "CONTENT_ENCRYPTION_KEY_PREVIOUS".into(),
        }
    }
}

impl KeySource for EnvKeySource {
    fn primary(&self) -> Result<String> {
        std::env::var(&self.primary_var)
            .map_err(|_| CoreError::fatal(format!("{} not set", self.primary_var)))
    }

    fn previous(&self) -> Vec<String> {
        std::env::var(&self.previous_var)
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct VersionedKey {
    id: String,
    cipher: Aes256Gcm,
}

/// Message content cipher with key-version tracking.
pub struct ContentCipher {
    primary: VersionedKey,
    keys: HashMap<String, Aes256Gcm>,
}

impl ContentCipher {
    /// Build from versioned key strings (`key_id:base64_key`).
    pub fn new(primary: &str, previous: &[&str]) -> Result<Self> {
        let (primary_id, primary_cipher) = parse_versioned_key(primary)?;
        let mut keys = HashMap::new();
        keys.insert(primary_id.clone(), primary_cipher.clone());
        for key in previous {
            let (id, cipher) = parse_versioned_key(key)?;
            if keys.insert(id.clone(), cipher).is_some() {
                return Err(CoreError::fatal(format!("duplicate key id: {id}")));
            }
        }
        Ok(Self {
            primary: VersionedKey {
                id: primary_id,
                cipher: primary_cipher,
            },
            keys,
        })
    }

    pub fn from_source(source: &dyn KeySource) -> Result<Self> {
        let primary = source.primary()?;
        let previous = source.previous();
        let refs: Vec<&str> = previous.iter().map(String::as_str).collect();
        Self::new(&primary, &refs)
    }

    /// Key version stamped on new encryptions.
    pub fn primary_key_id(&self) -> &str {
        &self.primary.id
    }

    /// Encrypt content with the primary key. Returns the JSON envelope and
    /// the key version to record alongside it.
    pub fn encrypt_content(&self, plaintext: &str) -> Result<(String, String)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .primary
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::fatal(format!("encryption failed: {e}")))?;

        let envelope = CipherEnvelope {
            v: PAYLOAD_VERSION,
            alg: ALGORITHM.to_string(),
            key_id: self.primary.id.clone(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| CoreError::fatal(format!("serialize envelope: {e}")))?;
        Ok((payload, self.primary.id.clone()))
    }

    /// Decrypt an envelope with whichever key version it names.
    pub fn decrypt_content(&self, payload: &str) -> Result<String> {
        let envelope: CipherEnvelope = serde_json::from_str(payload)
            .map_err(|e| CoreError::key_unavailable(format!("unreadable envelope: {e}")))?;
        if envelope.v != PAYLOAD_VERSION || envelope.alg != ALGORITHM {
            return Err(CoreError::key_unavailable(format!(
                "unsupported envelope v{} alg {}",
                envelope.v, envelope.alg
            )));
        }
        let cipher = self.keys.get(&envelope.key_id).ok_or_else(|| {
            CoreError::key_unavailable(format!("no key for version {}", envelope.key_id))
        })?;
        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| CoreError::key_unavailable(format!("bad nonce: {e}")))?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| CoreError::key_unavailable(format!("bad ciphertext: {e}")))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| {
                CoreError::key_unavailable(format!(
                    "decryption failed under key {}",
                    envelope.key_id
                ))
            })?;
        String::from_utf8(plaintext)
            .map_err(|e| CoreError::key_unavailable(format!("decrypted content not utf-8: {e}")))
    }
}

fn parse_versioned_key(key: &str) -> Result<(String, Aes256Gcm)> {
    let (id, encoded) = key
        .split_once(':')
        .ok_or_else(|| CoreError::fatal("key must be key_id:base64_key"))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CoreError::fatal(format!("key {id} is not valid base64: {e}")))?;
    if bytes.len() != KEY_SIZE {
        return Err(CoreError::fatal(format!(
            "key {id} must be {KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(&bytes)
        .map_err(|e| CoreError::fatal(format!("key {id} unusable: {e}")))?;
    Ok((id.to_string(), cipher))
}

/// Generate a random versioned key string (operational tooling).
pub fn generate_content_key(key_id: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{key_id}:{}", BASE64.encode(key))
}

/// Re-encrypt up to `batch_size` stale messages under the primary key.
/// Returns the number of rows rewritten; call repeatedly until it returns
/// zero to drain a rotation.
pub async fn rotate_batch(
    warm: &Arc<dyn WarmStore>,
    cipher: &ContentCipher,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = batch_size.clamp(ROTATION_BATCH_MIN, ROTATION_BATCH_MAX);
    let stale = warm
        .messages_needing_rotation(cipher.primary_key_id(), batch_size as i64)
        .await?;
    let mut rotated = 0usize;
    for record in stale {
        let plaintext = cipher.decrypt_content(&record.message.content)?;
        let (payload, key_version) = cipher.encrypt_content(&plaintext)?;
        warm.update_message_content(record.message.id, payload, key_version)
            .await?;
        rotated += 1;
    }
    if rotated > 0 {
        tracing::info!(count = rotated, keyId = cipher.primary_key_id(), "rotated message content");
    }
    Ok(rotated)
}

/// Spawn the cron-scheduled rotation loop: at every fire time, re-encrypt
/// stale rows in bounded batches until none remain.
pub fn spawn_rotation(
    warm: Arc<dyn WarmStore>,
    cipher: Arc<ContentCipher>,
    cron_expr: &str,
    batch_size: usize,
) -> Result<RotationHandle> {
    use std::str::FromStr;
    let schedule = cron::Schedule::from_str(cron_expr)
        .map_err(|e| CoreError::fatal(format!("invalid rotation schedule {cron_expr:?}: {e}")))?;
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                return;
            };
            let wait = (next - chrono::Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.changed() => return,
            }
            loop {
                match rotate_batch(&warm, &cipher, batch_size).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "rotation batch failed");
                        break;
                    }
                }
            }
        }
    });
    Ok(RotationHandle {
        handle,
        shutdown_tx,
    })
}

/// Handle to a running rotation loop.
pub struct RotationHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl RotationHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}
