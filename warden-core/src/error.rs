use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type WardenResult<T> = Result<T, WardenError>;

/// A single field-level validation problem, reported back to the agent.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("validation failed ({} field(s))", violations.len())]
    ValidationFailed { violations: Vec<FieldViolation> },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited ({scope}), retry after {retry_after_secs}s")]
    RateLimited { scope: String, retry_after_secs: u64 },

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote timeout after {0} ms")]
    RemoteTimeout(u64),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl WardenError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::RemoteTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::StoreUnavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for WardenError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = match &self {
            Self::ValidationFailed { violations } => serde_json::json!({
                "success": false,
                "message": self.to_string(),
                "fields": violations,
            }),
            Self::RateLimited { retry_after_secs, .. } => serde_json::json!({
                "success": false,
                "message": self.to_string(),
                "retryAfterSecs": retry_after_secs,
            }),
            _ => serde_json::json!({
                "success": false,
                "message": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
