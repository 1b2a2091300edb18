use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Failure kinds surfaced by the hub, either as a scoped `error` event to the
/// emitting connection or as an HTTP status on the REST surface.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl HubError {
    pub fn missing(field: &str) -> Self {
        Self::InvalidPayload(format!("Missing required parameter: {field}"))
    }

    /// Stable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::InvalidPayload(_) => "invalid_payload",
            HubError::NotFound(_) => "not_found",
            HubError::Forbidden(_) => "forbidden",
            HubError::InvalidArgument(_) => "invalid_argument",
            HubError::Unavailable(_) => "unavailable",
        }
    }

    /// Message safe to show to the client. Downstream details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            HubError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for HubError {
    fn from(e: sqlx::Error) -> Self {
        HubError::Unavailable(format!("database error: {e}"))
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::InvalidPayload(_) | HubError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Forbidden(_) => StatusCode::FORBIDDEN,
            HubError::Unavailable(detail) => {
                error!(%detail, "request failed on a downstream dependency");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let body = serde_json::json!({
            "error": self.client_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
