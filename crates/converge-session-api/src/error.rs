// HTTP mapping of core error kinds. Bodies are `{"error": "<lowercase
// message>"}` with conventional status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use converge_core::{CoreError, ErrorKind};
use serde_json::json;

/// Error wrapper implementing axum's IntoResponse.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PolicyDenied => StatusCode::FORBIDDEN,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::QueueEmpty => StatusCode::NO_CONTENT,
            ErrorKind::Fatal | ErrorKind::KeyUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(json!({ "error": self.0.to_string().to_lowercase() }));
        (status, body).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(CoreError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(CoreError::not_found("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(CoreError::conflict("x")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(CoreError::policy_denied("x")).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(CoreError::key_unavailable("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
