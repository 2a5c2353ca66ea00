// Session CRUD HTTP routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use converge_core::Session;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::service::NewSession;
use crate::state::AppState;

/// Request to create a session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Client-supplied id for idempotent retries; server-issued if absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Agent serving this conversation.
    #[schema(example = "support-bot")]
    pub agent_name: String,
    /// Workspace the agent belongs to.
    #[schema(example = "acme")]
    pub workspace: String,
    /// Tags for organizing and filtering sessions.
    #[serde(default)]
    pub tags: Vec<String>,
    /// End-user subject, when known.
    #[serde(default)]
    pub user_id: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route(
            "/sessions/:session_id",
            axum::routing::get(get_session).delete(delete_session),
        )
        .with_state(state)
}

/// POST /sessions - Create a session (warm-durable before 2xx)
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Recording denied by privacy policy")
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state
        .service
        .create_session(NewSession {
            id: req.id,
            agent_name: req.agent_name,
            workspace: req.workspace,
            tags: req.tags,
            user_id: req.user_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions/{session_id} - Read through hot, warm, then cold
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session found", body = Session),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    let session = state
        .service
        .get_session(session_id)
        .await?
        .ok_or_else(|| {
            ApiError(converge_core::CoreError::not_found(format!(
                "session {session_id}"
            )))
        })?;
    Ok(Json(session))
}

/// DELETE /sessions/{session_id} - Cascade across all tiers
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.service.delete_session(session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(converge_core::CoreError::not_found(format!(
            "session {session_id}"
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_minimal() {
        let json = r#"{"agentName": "support-bot", "workspace": "acme"}"#;
        let req: CreateSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.agent_name, "support-bot");
        assert!(req.id.is_none());
        assert!(req.tags.is_empty());
        assert!(req.user_id.is_none());
    }

    #[test]
    fn test_create_request_full() {
        let id = Uuid::now_v7();
        let json = format!(
            r#"{{"id": "{id}", "agentName": "a", "workspace": "w", "tags": ["x"], "userId": "u-1"}}"#
        );
        let req: CreateSessionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.id, Some(id));
        assert_eq!(req.tags, vec!["x"]);
        assert_eq!(req.user_id.as_deref(), Some("u-1"));
    }
}
