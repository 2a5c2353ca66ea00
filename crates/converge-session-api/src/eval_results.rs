// Eval result routes: batch write per session, cross-session query.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use converge_core::EvalResult;
use converge_storage::warm::EvalResultFilter;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::service::NewEvalResult;
use crate::state::AppState;

/// An empty string denotes a conversation-level result on the wire.
fn empty_uuid_as_none<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// One eval result in a batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvalResultInput {
    /// Referenced message; empty or absent for conversation-level results.
    #[serde(default, deserialize_with = "empty_uuid_as_none")]
    #[schema(value_type = Option<String>)]
    pub message_id: Option<Uuid>,
    #[schema(example = "helpfulness")]
    pub eval_id: String,
    #[schema(example = "llm-judge")]
    pub eval_type: String,
    pub passed: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Batch write request; all-or-nothing.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WriteEvalResultsRequest {
    pub results: Vec<EvalResultInput>,
}

/// Query parameters for listing eval results.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct EvalResultQuery {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub eval_id: Option<String>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EvalResultList {
    pub items: Vec<EvalResult>,
    pub count: usize,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:session_id/eval-results", post(write_eval_results))
        .route("/eval-results", get(list_eval_results))
        .with_state(state)
}

/// POST /sessions/{session_id}/eval-results - All-or-nothing batch write
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/eval-results",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    request_body = WriteEvalResultsRequest,
    responses(
        (status = 201, description = "Batch written", body = EvalResultList),
        (status = 400, description = "Invalid batch"),
        (status = 404, description = "Session not found")
    ),
    tag = "eval-results"
)]
pub async fn write_eval_results(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<WriteEvalResultsRequest>,
) -> ApiResult<(StatusCode, Json<EvalResultList>)> {
    let inputs = req
        .results
        .into_iter()
        .map(|input| NewEvalResult {
            message_id: input.message_id,
            eval_id: input.eval_id,
            eval_type: input.eval_type,
            passed: input.passed,
            details: input.details,
        })
        .collect();
    let items = state.service.write_eval_results(session_id, inputs).await?;
    let count = items.len();
    Ok((StatusCode::CREATED, Json(EvalResultList { items, count })))
}

/// GET /eval-results - Filter by passed, evalId, sessionId; paginated
#[utoipa::path(
    get,
    path = "/eval-results",
    params(EvalResultQuery),
    responses((status = 200, description = "Matching eval results", body = EvalResultList)),
    tag = "eval-results"
)]
pub async fn list_eval_results(
    State(state): State<AppState>,
    Query(query): Query<EvalResultQuery>,
) -> ApiResult<Json<EvalResultList>> {
    let items = state
        .service
        .list_eval_results(EvalResultFilter {
            session_id: query.session_id,
            eval_id: query.eval_id,
            passed: query.passed,
            limit: query.limit.unwrap_or(100),
            offset: query.offset.unwrap_or(0),
        })
        .await?;
    let count = items.len();
    Ok(Json(EvalResultList { items, count }))
}
