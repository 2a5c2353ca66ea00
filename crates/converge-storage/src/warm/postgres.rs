// Postgres warm store.
//
// The `(session_id, id)` primary key on messages makes duplicate appends a
// unique violation (mapped to Conflict); `ON DELETE CASCADE` gives the
// deletion invariant at the schema level. Batch writes run in one
// transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{CoreError, EvalResult, Message, MessageRole, Result, Session, SessionState};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    AuditEntry, DeletionRequest, EvalResultFilter, MessageRecord, PrivacyPreference,
    SessionExport, WarmStore,
};

/// Postgres-backed implementation of [`WarmStore`].
#[derive(Clone)]
pub struct PostgresWarmStore {
    pool: PgPool,
}

impl PostgresWarmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply embedded migrations.
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| CoreError::fatal(format!("database connect: {e}")))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CoreError::fatal(format!("database migrate: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    match &e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => CoreError::conflict(db.message().to_string()),
            Some("23503") => CoreError::not_found(db.message().to_string()),
            _ => CoreError::transient(format!("database: {e}")),
        },
        sqlx::Error::RowNotFound => CoreError::not_found("row not found"),
        _ => CoreError::transient(format!("database: {e}")),
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    agent_name: String,
    workspace: String,
    user_id: Option<String>,
    state: String,
    tags: Vec<String>,
    message_count: i64,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            agent_name: row.agent_name,
            workspace: row.workspace,
            created_at: row.created_at,
            message_count: row.message_count,
            tags: row.tags,
            state: SessionState::from(row.state.as_str()),
            user_id: row.user_id,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    tool_call: Option<serde_json::Value>,
    tool_result: Option<serde_json::Value>,
    key_version: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_record(self) -> Result<MessageRecord> {
        let role: MessageRole = self.role.parse()?;
        let tool_call = self
            .tool_call
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::fatal(format!("corrupt tool_call column: {e}")))?;
        let tool_result = self
            .tool_result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::fatal(format!("corrupt tool_result column: {e}")))?;
        Ok(MessageRecord {
            message: Message {
                id: self.id,
                session_id: self.session_id,
                role,
                content: self.content,
                tool_call,
                tool_result,
                created_at: self.created_at,
            },
            key_version: self.key_version,
        })
    }
}

#[derive(FromRow)]
struct EvalResultRow {
    id: Uuid,
    session_id: Uuid,
    message_id: Option<Uuid>,
    eval_id: String,
    eval_type: String,
    passed: bool,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<EvalResultRow> for EvalResult {
    fn from(row: EvalResultRow) -> Self {
        EvalResult {
            id: row.id,
            session_id: row.session_id,
            message_id: row.message_id,
            eval_id: row.eval_id,
            eval_type: row.eval_type,
            passed: row.passed,
            details: row.details,
            created_at: row.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, tool_call, tool_result, key_version, created_at";
const SESSION_COLUMNS: &str =
    "id, agent_name, workspace, user_id, state, tags, message_count, created_at";
const EVAL_COLUMNS: &str =
    "id, session_id, message_id, eval_id, eval_type, passed, details, created_at";

#[async_trait]
impl WarmStore for PostgresWarmStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_session(&self, session: Session) -> Result<Session> {
        // Idempotent on id: keep the first writer's row
        sqlx::query(
            r#"
            INSERT INTO sessions (id, agent_name, workspace, user_id, state, tags, message_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(session.id)
        .bind(&session.agent_name)
        .bind(&session.workspace)
        .bind(&session.user_id)
        .bind(session.state.to_string())
        .bind(&session.tags)
        .bind(session.message_count)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_session(session.id)
            .await?
            .ok_or_else(|| CoreError::transient("session vanished after insert"))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Session::from))
    }

    async fn append_message(&self, record: MessageRecord) -> Result<MessageRecord> {
        let msg = &record.message;
        let tool_call = msg
            .tool_call
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::fatal(format!("serialize tool_call: {e}")))?;
        let tool_result = msg
            .tool_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::fatal(format!("serialize tool_result: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, tool_call, tool_result, key_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(msg.id)
        .bind(msg.session_id)
        .bind(msg.role.to_string())
        .bind(&msg.content)
        .bind(tool_call)
        .bind(tool_result)
        .bind(&record.key_version)
        .bind(msg.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let updated = sqlx::query(
            "UPDATE sessions SET message_count = message_count + 1 WHERE id = $1",
        )
        .bind(msg.session_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("session {}", msg.session_id)));
        }
        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = $1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(MessageRow::into_record).collect()
    }

    async fn write_eval_results(&self, results: Vec<EvalResult>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for result in &results {
            if let Some(message_id) = result.message_id {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM messages WHERE session_id = $1 AND id = $2)",
                )
                .bind(result.session_id)
                .bind(message_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
                if !exists {
                    return Err(CoreError::validation(format!(
                        "eval result references unknown message {message_id}"
                    )));
                }
            }
            sqlx::query(
                r#"
                INSERT INTO eval_results (id, session_id, message_id, eval_id, eval_type, passed, details, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(result.id)
            .bind(result.session_id)
            .bind(result.message_id)
            .bind(&result.eval_id)
            .bind(&result.eval_type)
            .bind(result.passed)
            .bind(&result.details)
            .bind(result.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_eval_results(&self, filter: EvalResultFilter) -> Result<Vec<EvalResult>> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let rows = sqlx::query_as::<_, EvalResultRow>(&format!(
            r#"
            SELECT {EVAL_COLUMNS} FROM eval_results
            WHERE ($1::uuid IS NULL OR session_id = $1)
              AND ($2::text IS NULL OR eval_id = $2)
              AND ($3::boolean IS NULL OR passed = $3)
            ORDER BY created_at, id
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.session_id)
        .bind(&filter.eval_id)
        .bind(filter.passed)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(EvalResult::from).collect())
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool> {
        // Messages and eval results cascade at the schema level
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn export_session(&self, id: Uuid) -> Result<Option<SessionExport>> {
        let Some(session) = self.get_session(id).await? else {
            return Ok(None);
        };
        let messages = self.list_messages(id).await?;
        let eval_results = self
            .list_eval_results(EvalResultFilter {
                session_id: Some(id),
                limit: i64::MAX,
                ..Default::default()
            })
            .await?;
        Ok(Some(SessionExport {
            session,
            messages,
            eval_results,
        }))
    }

    async fn import_session(&self, export: SessionExport) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(export.session.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let session = &export.session;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, agent_name, workspace, user_id, state, tags, message_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(&session.agent_name)
        .bind(&session.workspace)
        .bind(&session.user_id)
        .bind(session.state.to_string())
        .bind(&session.tags)
        .bind(export.messages.len() as i64)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for record in &export.messages {
            let msg = &record.message;
            let tool_call = msg
                .tool_call
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| CoreError::fatal(format!("serialize tool_call: {e}")))?;
            let tool_result = msg
                .tool_result
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| CoreError::fatal(format!("serialize tool_result: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO messages (id, session_id, role, content, tool_call, tool_result, key_version, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(msg.id)
            .bind(msg.session_id)
            .bind(msg.role.to_string())
            .bind(&msg.content)
            .bind(tool_call)
            .bind(tool_result)
            .bind(&record.key_version)
            .bind(msg.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        for result in &export.eval_results {
            sqlx::query(
                r#"
                INSERT INTO eval_results (id, session_id, message_id, eval_id, eval_type, passed, details, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(result.id)
            .bind(result.session_id)
            .bind(result.message_id)
            .bind(&result.eval_id)
            .bind(&result.eval_type)
            .bind(result.passed)
            .bind(&result.details)
            .bind(result.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE created_at < $1 ORDER BY created_at LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn get_privacy_preference(&self, user_id: &str) -> Result<Option<PrivacyPreference>> {
        let row: Option<(String, bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, opted_out, updated_at FROM privacy_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|(user_id, opted_out, updated_at)| PrivacyPreference {
            user_id,
            opted_out,
            updated_at,
        }))
    }

    async fn set_privacy_preference(&self, pref: PrivacyPreference) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO privacy_preferences (user_id, opted_out, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET opted_out = $2, updated_at = $3
            "#,
        )
        .bind(&pref.user_id)
        .bind(pref.opted_out)
        .bind(pref.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn enqueue_deletion_request(&self, request: DeletionRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deletion_requests (id, session_id, requested_by, requested_at, due_at, fulfilled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id)
        .bind(request.session_id)
        .bind(&request.requested_by)
        .bind(request.requested_at)
        .bind(request.due_at)
        .bind(request.fulfilled_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn due_deletion_requests(&self, now: DateTime<Utc>) -> Result<Vec<DeletionRequest>> {
        let rows: Vec<(Uuid, Uuid, String, DateTime<Utc>, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                SELECT id, session_id, requested_by, requested_at, due_at, fulfilled_at
                FROM deletion_requests
                WHERE fulfilled_at IS NULL AND due_at <= $1
                ORDER BY due_at
                "#,
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(
                |(id, session_id, requested_by, requested_at, due_at, fulfilled_at)| {
                    DeletionRequest {
                        id,
                        session_id,
                        requested_by,
                        requested_at,
                        due_at,
                        fulfilled_at,
                    }
                },
            )
            .collect())
    }

    async fn mark_deletion_fulfilled(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query("UPDATE deletion_requests SET fulfilled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("deletion request {id}")));
        }
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_entries (id, action, subject, detail, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(&entry.subject)
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit(&self, subject: &str) -> Result<Vec<AuditEntry>> {
        let rows: Vec<(Uuid, String, String, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, action, subject, detail, created_at FROM audit_entries WHERE subject = $1 ORDER BY created_at",
        )
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, action, subject, detail, created_at)| AuditEntry {
                id,
                action,
                subject,
                detail,
                created_at,
            })
            .collect())
    }

    async fn messages_needing_rotation(
        &self,
        current: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE key_version IS NOT NULL AND key_version <> $1
            ORDER BY created_at
            LIMIT $2
            "#
        ))
        .bind(current)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(MessageRow::into_record).collect()
    }

    async fn update_message_content(
        &self,
        message_id: Uuid,
        content: String,
        key_version: String,
    ) -> Result<()> {
        let updated =
            sqlx::query("UPDATE messages SET content = $2, key_version = $3 WHERE id = $1")
                .bind(message_id)
                .bind(content)
                .bind(key_version)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("message {message_id}")));
        }
        Ok(())
    }
}
