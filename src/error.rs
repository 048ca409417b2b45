use serde_json::json;

use crate::util::truncate_on_char_boundary;

const MAX_UPSTREAM_DETAILS_BYTES: usize = 2048;

/// Error type shared by the relay endpoint, the gate, and the upstream transport.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Missing credential or secret on the server. Never carries the secret itself.
    #[error("Server configuration error: {0}")]
    Config(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Upstream error: status={status}")]
    Upstream { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Configuration,
    Permission,
    RateLimit,
    Upstream,
    ServerError,
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::Config(_) => ErrorCategory::Configuration,
            RelayError::Forbidden(_) => ErrorCategory::Permission,
            RelayError::RateLimited { .. } => ErrorCategory::RateLimit,
            RelayError::Upstream { .. } => ErrorCategory::Upstream,
            RelayError::Transport(_) | RelayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Build an upstream error from a raw error body, keeping it bounded.
    #[must_use]
    pub fn upstream(status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        RelayError::Upstream {
            status,
            body: truncate_on_char_boundary(trimmed, MAX_UPSTREAM_DETAILS_BYTES).to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            RelayError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            other => http_status_for_category(other.category()),
        }
    }

    /// JSON body: `{ "error": ..., "details"?: ... }`, plus `message`/`retryAfter`
    /// for rate limiting.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            RelayError::InvalidRequest(message) => json!({ "error": message }),
            RelayError::Config(details) => json!({
                "error": "Server configuration error",
                "details": details,
            }),
            RelayError::Forbidden(details) => json!({
                "error": "Forbidden",
                "details": details,
            }),
            RelayError::RateLimited { retry_after_secs } => json!({
                "error": "Too many requests",
                "message": "Rate limit exceeded for this model.",
                "retryAfter": retry_after_secs,
            }),
            RelayError::Upstream { status, body } => {
                if body.is_empty() {
                    json!({ "error": format!("Upstream request failed with status {status}") })
                } else {
                    json!({
                        "error": format!("Upstream request failed with status {status}"),
                        "details": body,
                    })
                }
            }
            RelayError::Transport(details) => json!({
                "error": "Failed to reach the model provider",
                "details": details,
            }),
            RelayError::Internal(details) => json!({
                "error": "Internal server error",
                "details": details,
            }),
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Upstream => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::Configuration | ErrorCategory::ServerError => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let mut response = (status, axum::Json(self.body())).into_response();
        if let RelayError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response
                    .headers_mut()
                    .insert(http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
