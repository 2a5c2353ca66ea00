// Session API: HTTP service fronting the tiered storage registry.

pub mod error;
pub mod eval_results;
pub mod messages;
pub mod privacy_routes;
pub mod service;
pub mod sessions;
pub mod state;

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::TextEncoder;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use service::SessionService;
pub use state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /healthz - process liveness
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /readyz - warm store ping
async fn readyz(State(state): State<AppState>) -> Response {
    let Ok(warm) = state.registry.warm() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "warm store not configured" })),
        )
            .into_response();
    };
    match warm.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ready" }))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string().to_lowercase() })),
        )
            .into_response(),
    }
}

/// GET /metrics - Prometheus text format
async fn metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&state.metrics.gather()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Record request counts and latency per matched route.
async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let response = next.run(req).await;
    state
        .http_metrics
        .requests
        .with_label_values(&[&method, &route, response.status().as_str()])
        .inc();
    state
        .http_metrics
        .duration
        .with_label_values(&[&method, &route])
        .observe(start.elapsed().as_secs_f64());
    response
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        sessions::create_session,
        sessions::get_session,
        sessions::delete_session,
        messages::append_message,
        messages::list_messages,
        eval_results::write_eval_results,
        eval_results::list_eval_results,
        privacy_routes::get_preference,
        privacy_routes::set_preference,
        privacy_routes::request_erasure,
    ),
    components(schemas(
        converge_core::Session,
        converge_core::SessionState,
        converge_core::Message,
        converge_core::MessageRole,
        converge_core::EvalResult,
        converge_core::ToolCall,
        converge_core::ToolResult,
        sessions::CreateSessionRequest,
        messages::AppendMessageRequest,
        messages::MessageList,
        eval_results::EvalResultInput,
        eval_results::WriteEvalResultsRequest,
        eval_results::EvalResultList,
        privacy_routes::SetPreferenceRequest,
        privacy_routes::PreferenceResponse,
        privacy_routes::ErasureRequestBody,
        privacy_routes::ErasureResponse,
    )),
    tags(
        (name = "sessions", description = "Session lifecycle"),
        (name = "messages", description = "Transcript append and read"),
        (name = "eval-results", description = "Evaluation results"),
        (name = "privacy", description = "Consent and erasure")
    ),
    info(
        title = "Converge Session API",
        description = "Tiered storage service for agent conversations and evaluation results"
    )
)]
pub struct ApiDoc;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(sessions::routes(state.clone()))
        .merge(messages::routes(state.clone()))
        .merge(eval_results::routes(state.clone()))
        .merge(privacy_routes::routes(state.clone()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz).with_state(state.clone()))
        .route("/metrics", get(metrics).with_state(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
