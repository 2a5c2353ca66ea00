// In-memory warm store for development and tests. Mirrors the Postgres
// implementation's semantics, including the uniqueness and cascade rules.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{CoreError, EvalResult, Result, Session};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    AuditEntry, DeletionRequest, EvalResultFilter, MessageRecord, PrivacyPreference,
    SessionExport, WarmStore,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    messages: HashMap<Uuid, Vec<MessageRecord>>,
    eval_results: HashMap<Uuid, Vec<EvalResult>>,
    preferences: HashMap<String, PrivacyPreference>,
    deletion_requests: Vec<DeletionRequest>,
    audit: Vec<AuditEntry>,
}

/// In-memory implementation of [`WarmStore`].
#[derive(Default)]
pub struct MemoryWarmStore {
    inner: RwLock<Inner>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions (test helper).
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }
}

#[async_trait]
impl WarmStore for MemoryWarmStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_session(&self, session: Session) -> Result<Session> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.sessions.get(&session.id) {
            return Ok(existing.clone());
        }
        inner.messages.insert(session.id, vec![]);
        inner.eval_results.insert(session.id, vec![]);
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    async fn append_message(&self, record: MessageRecord) -> Result<MessageRecord> {
        let mut inner = self.inner.write();
        let session_id = record.message.session_id;
        if !inner.sessions.contains_key(&session_id) {
            return Err(CoreError::not_found(format!("session {session_id}")));
        }
        let messages = inner.messages.entry(session_id).or_default();
        if messages.iter().any(|m| m.message.id == record.message.id) {
            return Err(CoreError::conflict(format!(
                "message {} already exists in session {session_id}",
                record.message.id
            )));
        }
        messages.push(record.clone());
        messages.sort_by(|a, b| {
            (a.message.created_at, a.message.id).cmp(&(b.message.created_at, b.message.id))
        });
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.message_count += 1;
        }
        Ok(record)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<MessageRecord>> {
        Ok(self
            .inner
            .read()
            .messages
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_eval_results(&self, results: Vec<EvalResult>) -> Result<()> {
        let mut inner = self.inner.write();
        // All-or-nothing: validate the whole batch before touching state
        for result in &results {
            if !inner.sessions.contains_key(&result.session_id) {
                return Err(CoreError::not_found(format!(
                    "session {}",
                    result.session_id
                )));
            }
            if let Some(message_id) = result.message_id {
                let known = inner
                    .messages
                    .get(&result.session_id)
                    .map(|ms| ms.iter().any(|m| m.message.id == message_id))
                    .unwrap_or(false);
                if !known {
                    return Err(CoreError::validation(format!(
                        "eval result references unknown message {message_id}"
                    )));
                }
            }
        }
        for result in results {
            inner
                .eval_results
                .entry(result.session_id)
                .or_default()
                .push(result);
        }
        Ok(())
    }

    async fn list_eval_results(&self, filter: EvalResultFilter) -> Result<Vec<EvalResult>> {
        let inner = self.inner.read();
        let mut results: Vec<EvalResult> = inner
            .eval_results
            .values()
            .flatten()
            .filter(|r| filter.session_id.map_or(true, |id| r.session_id == id))
            .filter(|r| {
                filter
                    .eval_id
                    .as_ref()
                    .map_or(true, |eval_id| &r.eval_id == eval_id)
            })
            .filter(|r| filter.passed.map_or(true, |p| r.passed == p))
            .cloned()
            .collect();
        results.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        let offset = filter.offset.max(0) as usize;
        let limit = if filter.limit > 0 {
            filter.limit as usize
        } else {
            usize::MAX
        };
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write();
        let existed = inner.sessions.remove(&id).is_some();
        inner.messages.remove(&id);
        inner.eval_results.remove(&id);
        Ok(existed)
    }

    async fn export_session(&self, id: Uuid) -> Result<Option<SessionExport>> {
        let inner = self.inner.read();
        let Some(session) = inner.sessions.get(&id) else {
            return Ok(None);
        };
        Ok(Some(SessionExport {
            session: session.clone(),
            messages: inner.messages.get(&id).cloned().unwrap_or_default(),
            eval_results: inner.eval_results.get(&id).cloned().unwrap_or_default(),
        }))
    }

    async fn import_session(&self, export: SessionExport) -> Result<()> {
        let mut inner = self.inner.write();
        let id = export.session.id;
        inner.sessions.insert(id, export.session);
        inner.messages.insert(id, export.messages);
        inner.eval_results.insert(id, export.eval_results);
        Ok(())
    }

    async fn sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Session>> {
        let inner = self.inner.read();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.created_at < cutoff)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn get_privacy_preference(&self, user_id: &str) -> Result<Option<PrivacyPreference>> {
        Ok(self.inner.read().preferences.get(user_id).cloned())
    }

    async fn set_privacy_preference(&self, pref: PrivacyPreference) -> Result<()> {
        self.inner
            .write()
            .preferences
            .insert(pref.user_id.clone(), pref);
        Ok(())
    }

    async fn enqueue_deletion_request(&self, request: DeletionRequest) -> Result<()> {
        self.inner.write().deletion_requests.push(request);
        Ok(())
    }

    async fn due_deletion_requests(&self, now: DateTime<Utc>) -> Result<Vec<DeletionRequest>> {
        Ok(self
            .inner
            .read()
            .deletion_requests
            .iter()
            .filter(|r| r.fulfilled_at.is_none() && r.due_at <= now)
            .cloned()
            .collect())
    }

    async fn mark_deletion_fulfilled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.deletion_requests.iter_mut().find(|r| r.id == id) {
            Some(request) => {
                request.fulfilled_at = Some(at);
                Ok(())
            }
            None => Err(CoreError::not_found(format!("deletion request {id}"))),
        }
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.inner.write().audit.push(entry);
        Ok(())
    }

    async fn list_audit(&self, subject: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .inner
            .read()
            .audit
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect())
    }

    async fn messages_needing_rotation(
        &self,
        current: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .values()
            .flatten()
            .filter(|m| {
                m.key_version
                    .as_deref()
                    .map_or(false, |version| version != current)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update_message_content(
        &self,
        message_id: Uuid,
        content: String,
        key_version: String,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        for messages in inner.messages.values_mut() {
            if let Some(record) = messages.iter_mut().find(|m| m.message.id == message_id) {
                record.message.content = content;
                record.key_version = Some(key_version);
                return Ok(());
            }
        }
        Err(CoreError::not_found(format!("message {message_id}")))
    }
}
