use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use gatehouse_core::GateError;

/// HTTP-facing error type.
/// Implements `IntoResponse` so handlers can return `Result<T, ApiError>`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Already registered")]
    Conflict,

    #[error("No access")]
    NoAccess,

    #[error("Subscription limit reached")]
    QuotaExceeded,

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::InvalidInput(msg) => ApiError::Validation(msg),
            GateError::Conflict => ApiError::Conflict,
            GateError::NoAccess => ApiError::NoAccess,
            GateError::QuotaExceeded => ApiError::QuotaExceeded,
            // Tokens are consumed on the bot side; an HTTP caller seeing
            // this indicates a wiring bug upstream.
            GateError::InvalidToken => ApiError::Validation("Invalid token".into()),
            GateError::OracleUnknown => {
                ApiError::Internal(anyhow::anyhow!("membership oracle unavailable"))
            }
            GateError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::Conflict => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "User already exists".to_string(),
            ),
            ApiError::NoAccess => (StatusCode::FORBIDDEN, "NO_ACCESS", "No access".to_string()),
            ApiError::QuotaExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
                "Subscription limit reached".to_string(),
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests".to_string(),
            ),
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
