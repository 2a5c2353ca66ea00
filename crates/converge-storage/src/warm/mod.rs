// Warm tier: durable, queryable source of truth.
//
// Every write linearizes here before any other tier sees it. Message
// content may be ciphertext; the `key_version` travels with the record so
// rotation can find stale rows without opening payloads.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{EvalResult, Message, Result, Session};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryWarmStore;
pub use postgres::PostgresWarmStore;

/// A message row as the warm tier stores it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub message: Message,
    /// Encryption key version for ciphertext content, `None` for plaintext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
}

impl MessageRecord {
    pub fn plaintext(message: Message) -> Self {
        Self {
            message,
            key_version: None,
        }
    }
}

/// Everything a session owns, as one portable bundle. This is the unit the
/// retention sweeper moves between tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: Session,
    pub messages: Vec<MessageRecord>,
    pub eval_results: Vec<EvalResult>,
}

/// Query filter for eval results.
#[derive(Debug, Clone, Default)]
pub struct EvalResultFilter {
    pub session_id: Option<Uuid>,
    pub eval_id: Option<String>,
    pub passed: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

impl EvalResultFilter {
    pub fn for_session(session_id: Uuid) -> Self {
        Self {
            session_id: Some(session_id),
            limit: 100,
            ..Default::default()
        }
    }
}

/// Recorded privacy choice for one end user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivacyPreference {
    pub user_id: String,
    pub opted_out: bool,
    pub updated_at: DateTime<Utc>,
}

/// Pending GDPR-style erasure of one session across all tiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub session_id: Uuid,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Append-only audit trail entry for privacy-relevant operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub subject: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, subject: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            action: action.into(),
            subject: subject.into(),
            detail,
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for dyn WarmStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dyn WarmStore")
    }
}

/// Capability interface of the warm tier.
#[async_trait]
pub trait WarmStore: Send + Sync + 'static {
    /// Liveness probe backing `/readyz`.
    async fn ping(&self) -> Result<()>;

    /// Create a session. Idempotent on id: re-creating an existing id
    /// returns the stored session unchanged.
    async fn create_session(&self, session: Session) -> Result<Session>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Append one message; bumps the session's message count. The unique
    /// `(session_id, id)` index makes concurrent duplicate appends a
    /// `Conflict`.
    async fn append_message(&self, record: MessageRecord) -> Result<MessageRecord>;

    /// Messages ordered by `(created_at, id)`.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<MessageRecord>>;

    /// All-or-nothing batch write.
    async fn write_eval_results(&self, results: Vec<EvalResult>) -> Result<()>;

    async fn list_eval_results(&self, filter: EvalResultFilter) -> Result<Vec<EvalResult>>;

    /// Delete a session and cascade to messages and eval results.
    /// Returns false when the session did not exist.
    async fn delete_session(&self, id: Uuid) -> Result<bool>;

    /// Full export for archival or rehydration.
    async fn export_session(&self, id: Uuid) -> Result<Option<SessionExport>>;

    /// Import a previously exported session (cold rehydration). Replaces
    /// any existing rows for the same id.
    async fn import_session(&self, export: SessionExport) -> Result<()>;

    /// Sessions created before `cutoff`, oldest first, for the sweeper.
    async fn sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Session>>;

    // Privacy preferences

    async fn get_privacy_preference(&self, user_id: &str) -> Result<Option<PrivacyPreference>>;
    async fn set_privacy_preference(&self, pref: PrivacyPreference) -> Result<()>;

    // Deletion requests

    async fn enqueue_deletion_request(&self, request: DeletionRequest) -> Result<()>;
    async fn due_deletion_requests(&self, now: DateTime<Utc>) -> Result<Vec<DeletionRequest>>;
    async fn mark_deletion_fulfilled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Audit

    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;
    async fn list_audit(&self, subject: &str) -> Result<Vec<AuditEntry>>;

    // Key rotation support

    /// Encrypted messages whose key version differs from `current`,
    /// bounded by `limit`.
    async fn messages_needing_rotation(
        &self,
        current: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>>;

    /// Replace a message's content and key version after re-encryption.
    async fn update_message_content(
        &self,
        message_id: Uuid,
        content: String,
        key_version: String,
    ) -> Result<()>;
}
