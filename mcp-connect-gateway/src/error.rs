//! HTTP rendering of gateway errors.
//!
//! Every error response has the body `{"error": "<message>"}`. Server-side
//! failures are logged with full detail and answered with an opaque message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mcp_connect_core::GatewayError;
use mcp_connect_core::config::ConfigError;
use serde_json::json;

/// Failures that stop the binary before or while serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// An error ready to be sent to an HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// A 500 with an opaque `public` message; `cause` is only logged.
    pub fn internal(public: &str, cause: &dyn std::error::Error) -> Self {
        tracing::error!(error = %cause, "{public}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, public)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::Configuration(_) | GatewayError::Transport(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            GatewayError::Auth { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            GatewayError::Backend { .. } => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.public_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
