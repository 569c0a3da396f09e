// HTTP error mapping
//
// Cross-workspace access renders identically to "not found" so existence
// cannot be probed; the audit trail keeps the detailed cause server-side.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use relay_core::PlatformError;

pub struct ApiError(pub PlatformError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<PlatformError> for ApiError {
    fn from(error: PlatformError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PlatformError::MissingContext => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            PlatformError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            PlatformError::NotFound(_) | PlatformError::AccessDenied => {
                (StatusCode::NOT_FOUND, "not found".to_string())
            }
            PlatformError::Dependency(_) => {
                tracing::error!(error = %self.0, "dependency failure");
                (StatusCode::BAD_GATEWAY, "dependency unavailable".to_string())
            }
            PlatformError::Timeout(_) => {
                (StatusCode::GATEWAY_TIMEOUT, "timed out".to_string())
            }
            PlatformError::TriggerExecution(_)
            | PlatformError::BudgetExceeded { .. }
            | PlatformError::Internal(_) => {
                tracing::error!(error = %self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_renders_as_not_found() {
        let response = ApiError(PlatformError::AccessDenied).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError(PlatformError::not_found("trigger x")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_is_bad_request() {
        let response = ApiError(PlatformError::validation("bad name")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
