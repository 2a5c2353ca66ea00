// Consent surface: per-user opt-out and erasure requests.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetPreferenceRequest {
    pub opted_out: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceResponse {
    pub user_id: String,
    pub opted_out: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErasureRequestBody {
    #[schema(example = "user-42")]
    pub requested_by: String,
    /// Fulfillment window in days; defaults to 30.
    #[serde(default = "default_delete_within_days")]
    pub delete_within_days: u32,
}

fn default_delete_within_days() -> u32 {
    30
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErasureResponse {
    pub request_id: Uuid,
    pub due_at: chrono::DateTime<chrono::Utc>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/privacy/preferences/:user_id",
            get(get_preference).put(set_preference),
        )
        .route(
            "/sessions/:session_id/erasure-requests",
            post(request_erasure),
        )
        .with_state(state)
}

/// GET /privacy/preferences/{user_id}
#[utoipa::path(
    get,
    path = "/privacy/preferences/{user_id}",
    params(("user_id" = String, Path, description = "End-user id")),
    responses((status = 200, description = "Current preference", body = PreferenceResponse)),
    tag = "privacy"
)]
pub async fn get_preference(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<PreferenceResponse>> {
    let opted_out = state.service.consent().is_opted_out(&user_id).await?;
    Ok(Json(PreferenceResponse { user_id, opted_out }))
}

/// PUT /privacy/preferences/{user_id} - Toggle opt-out
#[utoipa::path(
    put,
    path = "/privacy/preferences/{user_id}",
    params(("user_id" = String, Path, description = "End-user id")),
    request_body = SetPreferenceRequest,
    responses((status = 200, description = "Preference stored", body = PreferenceResponse)),
    tag = "privacy"
)]
pub async fn set_preference(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<SetPreferenceRequest>,
) -> ApiResult<Json<PreferenceResponse>> {
    state
        .service
        .consent()
        .set_opt_out(&user_id, req.opted_out)
        .await?;
    Ok(Json(PreferenceResponse {
        user_id,
        opted_out: req.opted_out,
    }))
}

/// POST /sessions/{session_id}/erasure-requests - Enqueue GDPR erasure
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/erasure-requests",
    params(("session_id" = Uuid, Path, description = "Session ID")),
    request_body = ErasureRequestBody,
    responses((status = 202, description = "Erasure enqueued", body = ErasureResponse)),
    tag = "privacy"
)]
pub async fn request_erasure(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ErasureRequestBody>,
) -> ApiResult<(StatusCode, Json<ErasureResponse>)> {
    let request = state
        .service
        .consent()
        .request_erasure(session_id, &req.requested_by, req.delete_within_days)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ErasureResponse {
            request_id: request.id,
            due_at: request.due_at,
        }),
    ))
}
