// Message append/list routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use converge_core::{Message, MessageRole, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::service::NewMessage;
use crate::state::AppState;

/// Request to append a message to a session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    pub role: MessageRole,
    #[schema(example = "What is on my invoice?")]
    pub content: String,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_result: Option<ToolResult>,
}

/// List wrapper so the array can grow metadata without breaking clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageList {
    pub items: Vec<Message>,
    pub count: usize,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/sessions/:session_id/messages",
            post(append_message).get(list_messages),
        )
        .with_state(state)
}

/// POST /sessions/{session_id}/messages - Append one message
///
/// Appends within a session are serialized; the response carries the
/// assigned message id.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/messages",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    request_body = AppendMessageRequest,
    responses(
        (status = 201, description = "Message appended", body = Message),
        (status = 404, description = "Session not found"),
        (status = 403, description = "Recording denied by privacy policy")
    ),
    tag = "messages"
)]
pub async fn append_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AppendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state
        .service
        .append_message(
            session_id,
            NewMessage {
                role: req.role,
                content: req.content,
                tool_call: req.tool_call,
                tool_result: req.tool_result,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /sessions/{session_id}/messages - Stable order by (createdAt, id)
#[utoipa::path(
    get,
    path = "/sessions/{session_id}/messages",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Messages in order", body = MessageList),
        (status = 404, description = "Session not found")
    ),
    tag = "messages"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<MessageList>> {
    let items = state.service.list_messages(session_id).await?;
    let count = items.len();
    Ok(Json(MessageList { items, count }))
}
