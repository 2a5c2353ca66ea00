// Session service: business logic between the HTTP routes and the tiered
// registry. Owns the privacy decorators, the per-session append locks, and
// event publication.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use converge_core::{
    CoreError, EvalResult, Message, MessageRole, Result, Session, SessionEvent, SessionState,
    ToolCall, ToolResult,
};
use converge_storage::hot::CachedSession;
use converge_storage::privacy::{ConsentService, PrivacyEngine};
use converge_storage::warm::{EvalResultFilter, MessageRecord};
use converge_storage::{EventSink, PolicyStore, StorageRegistry};
use parking_lot::Mutex;
use uuid::Uuid;

/// Input for creating a session. The id is client-supplied for idempotent
/// retries; absent ids get a server-issued v7.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Option<Uuid>,
    pub agent_name: String,
    pub workspace: String,
    pub tags: Vec<String>,
    pub user_id: Option<String>,
}

/// Input for appending one message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<ToolResult>,
}

/// Input for one eval result in a batch.
#[derive(Debug, Clone)]
pub struct NewEvalResult {
    pub message_id: Option<Uuid>,
    pub eval_id: String,
    pub eval_type: String,
    pub passed: bool,
    pub details: serde_json::Value,
}

pub struct SessionService {
    registry: Arc<StorageRegistry>,
    privacy: Arc<PrivacyEngine>,
    consent: ConsentService,
    events: Arc<dyn EventSink>,
    policies: PolicyStore,
    /// Serializes appends within one session; across sessions appends are
    /// fully parallel. The warm unique index is the backstop.
    append_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionService {
    pub fn new(
        registry: Arc<StorageRegistry>,
        privacy: Arc<PrivacyEngine>,
        events: Arc<dyn EventSink>,
        policies: PolicyStore,
    ) -> Result<Self> {
        let consent = ConsentService::new(registry.warm()?);
        Ok(Self {
            registry,
            privacy,
            consent,
            events,
            policies,
            append_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn consent(&self) -> &ConsentService {
        &self.consent
    }

    fn append_lock(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.append_locks
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(&event).await {
            // Event loss never compromises the data; warm is the truth
            tracing::warn!(eventType = event.event_type(), error = %e, "event publication failed");
        }
    }

    /// Create a session; warm-durable before returning. Idempotent on a
    /// client-supplied id.
    pub async fn create_session(&self, input: NewSession) -> Result<Session> {
        if input.agent_name.trim().is_empty() {
            return Err(CoreError::validation("agentName must not be empty"));
        }
        if input.workspace.trim().is_empty() {
            return Err(CoreError::validation("workspace must not be empty"));
        }
        if !self.privacy.records_facade() {
            return Err(CoreError::policy_denied(
                "facade recording is disabled by privacy policy",
            ));
        }
        self.consent
            .ensure_recording_allowed(input.user_id.as_deref())
            .await?;

        let session = Session {
            id: input.id.unwrap_or_else(Uuid::now_v7),
            agent_name: input.agent_name,
            workspace: input.workspace,
            created_at: Utc::now(),
            message_count: 0,
            tags: input.tags,
            state: SessionState::Active,
            user_id: input.user_id,
        };
        let stored = self.registry.warm()?.create_session(session).await?;
        self.publish(SessionEvent::SessionCreated {
            session: stored.clone(),
        })
        .await;
        Ok(stored)
    }

    /// Read through tiers: hot, then warm, then cold (with rehydration).
    pub async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        if let Ok(hot) = self.registry.hot() {
            if let Some(cached) = hot.get(id).await.unwrap_or(None) {
                return Ok(Some(cached.session));
            }
        }
        let policies = self.policies.read().clone();
        Ok(self
            .registry
            .load_session(id, &policies)
            .await?
            .map(|export| export.session))
    }

    /// Append one message. Monotonic per session: appends within a session
    /// are serialized, ids are v7, so `(created_at, id)` strictly increases.
    pub async fn append_message(&self, session_id: Uuid, input: NewMessage) -> Result<Message> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("session {session_id}")))?;
        self.consent
            .ensure_recording_allowed(session.user_id.as_deref())
            .await?;
        if !self.privacy.records_rich_data()
            && (input.tool_call.is_some() || input.tool_result.is_some())
        {
            return Err(CoreError::policy_denied(
                "rich data recording is disabled by privacy policy",
            ));
        }

        let lock = self.append_lock(session_id);
        let _guard = lock.lock().await;

        let (content, key_version) = self.privacy.seal(&input.content)?;
        let message = Message {
            id: Uuid::now_v7(),
            session_id,
            role: input.role,
            content,
            tool_call: input.tool_call,
            tool_result: input.tool_result,
            created_at: Utc::now(),
        };
        let record = MessageRecord {
            message,
            key_version,
        };
        let stored = self.registry.warm()?.append_message(record).await?;

        // The caller-visible message carries the sanitized plaintext
        let mut visible = stored.message.clone();
        visible.content = self
            .privacy
            .open(&visible.content, stored.key_version.as_deref())?;

        self.refresh_hot(session_id).await;
        self.publish(SessionEvent::MessageAppended {
            session_id,
            message: visible.clone(),
        })
        .await;
        Ok(visible)
    }

    /// Messages in stable `(created_at, id)` order, decrypted for the
    /// caller. Serves from the hot tier when possible.
    pub async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        if let Ok(hot) = self.registry.hot() {
            if let Some(cached) = hot.get(session_id).await.unwrap_or(None) {
                return Ok(cached.messages);
            }
        }
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("session {session_id}")))?;
        let records = self.registry.warm()?.list_messages(session_id).await?;
        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            let mut message = record.message;
            message.content = self
                .privacy
                .open(&message.content, record.key_version.as_deref())?;
            messages.push(message);
        }
        if let Ok(hot) = self.registry.hot() {
            let entry = CachedSession {
                session,
                messages: messages.clone(),
            };
            if let Err(e) = hot.put(entry).await {
                tracing::warn!(sessionId = %session_id, error = %e, "hot writethrough failed");
            }
        }
        Ok(messages)
    }

    /// Batch write, all-or-nothing.
    pub async fn write_eval_results(
        &self,
        session_id: Uuid,
        inputs: Vec<NewEvalResult>,
    ) -> Result<Vec<EvalResult>> {
        if inputs.is_empty() {
            return Err(CoreError::validation("eval result batch must not be empty"));
        }
        self.get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("session {session_id}")))?;

        let now = Utc::now();
        let results: Vec<EvalResult> = inputs
            .into_iter()
            .map(|input| EvalResult {
                id: Uuid::now_v7(),
                session_id,
                message_id: input.message_id,
                eval_id: input.eval_id,
                eval_type: input.eval_type,
                passed: input.passed,
                details: input.details,
                created_at: now,
            })
            .collect();
        let count = results.len();
        self.registry
            .warm()?
            .write_eval_results(results.clone())
            .await?;
        self.publish(SessionEvent::EvalWritten { session_id, count })
            .await;
        Ok(results)
    }

    pub async fn list_eval_results(&self, filter: EvalResultFilter) -> Result<Vec<EvalResult>> {
        self.registry.warm()?.list_eval_results(filter).await
    }

    /// Delete across all tiers; cascades to messages and eval results.
    pub async fn delete_session(&self, id: Uuid) -> Result<bool> {
        let existed = self.registry.delete_everywhere(id).await?;
        if existed {
            self.append_locks.lock().remove(&id);
            self.publish(SessionEvent::SessionDeleted {
                session_id: id,
                deleted_at: Utc::now(),
            })
            .await;
        }
        Ok(existed)
    }

    async fn refresh_hot(&self, session_id: Uuid) {
        let Ok(hot) = self.registry.hot() else {
            return;
        };
        // Drop the stale entry; the next read rebuilds it from warm
        if let Err(e) = hot.delete(session_id).await {
            tracing::warn!(sessionId = %session_id, error = %e, "hot invalidation failed");
        }
    }
}
