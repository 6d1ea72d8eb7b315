//! Relay error types.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pushprobe_core::PushProbeError;

/// Relay server error types mapped to HTTP status codes.
#[derive(Debug)]
pub enum RelayError {
    Core(PushProbeError),
    BadRequest(String),
    Unauthorized(String),
    RateLimited,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(e) => write!(f, "{}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            Self::RateLimited => write!(f, "Rate limited"),
        }
    }
}

impl std::error::Error for RelayError {}

impl RelayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::Core(e) => {
                let status = match e {
                    PushProbeError::Validation(_) => StatusCode::BAD_REQUEST,
                    PushProbeError::Conflict(_) => StatusCode::CONFLICT,
                    PushProbeError::NotFound(_) => StatusCode::NOT_FOUND,
                    PushProbeError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                    PushProbeError::Credential(_)
                    | PushProbeError::Secret(_)
                    | PushProbeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code())
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::BadRequest(e) | Self::Unauthorized(e) => e.clone(),
            Self::RateLimited => "Too many send requests, slow down".to_string(),
            Self::Core(
                PushProbeError::Validation(m)
                | PushProbeError::Conflict(m)
                | PushProbeError::NotFound(m),
            ) => m.clone(),
            Self::Core(PushProbeError::Upstream { .. }) => {
                "Push gateway request failed".to_string()
            }
            Self::Core(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }

        let body = serde_json::json!({
            "ok": false,
            "error": code,
            "message": self.public_message(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<PushProbeError> for RelayError {
    fn from(e: PushProbeError) -> Self {
        Self::Core(e)
    }
}

impl From<JsonRejection> for RelayError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid JSON body: {}", e.body_text()))
    }
}

impl From<QueryRejection> for RelayError {
    fn from(e: QueryRejection) -> Self {
        Self::BadRequest(format!("Invalid query string: {}", e.body_text()))
    }
}
