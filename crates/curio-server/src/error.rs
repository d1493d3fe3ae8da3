use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use curio_core::validate::ValidationError;
use curio_store::StoreError;
use serde_json::json;
use tracing::error;

/// Error surface of the HTTP boundary. Every variant maps to a status code
/// and a small JSON body; internal detail stays in the logs.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Forbidden(&'static str),
    NotFound(String),
    Conflict(String),
    RateLimited { retry_after: u64 },
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(detail) => Self::NotFound(detail),
            StoreError::Conflict(detail) => Self::Conflict(detail),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Validation(err) => (StatusCode::BAD_REQUEST, "invalid_request", err.to_string()),
            Self::Forbidden(reason) => (StatusCode::FORBIDDEN, "forbidden", (*reason).to_string()),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail.clone()),
            Self::Conflict(detail) => (StatusCode::CONFLICT, "conflict", detail.clone()),
            Self::RateLimited { retry_after } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({
                        "error": "rate_limited",
                        "message": "Too many requests, slow down.",
                        "retryAfter": retry_after,
                    })),
                )
                    .into_response();
                if let Ok(value) = retry_after.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
                return response;
            }
            Self::Internal(detail) => {
                error!(%detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Something went wrong.".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
