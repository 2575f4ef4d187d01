use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({code}): {message}")]
    Server { code: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, shared with the backend's error envelope.
    pub fn code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Server { code, .. } => code.as_str(),
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the local view of the entity may be stale and should be re-fetched.
    pub fn requires_resync(&self) -> bool {
        matches!(self, AppError::InvalidState(_) | AppError::NotFound(_))
    }
}

/// Error body returned by the practicum backend: `{message, code}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl From<ErrorEnvelope> for AppError {
    fn from(envelope: ErrorEnvelope) -> Self {
        let ErrorEnvelope { message, code } = envelope;
        match code.as_deref() {
            Some("VALIDATION_ERROR") => AppError::Validation(message),
            Some("INVALID_STATE") => AppError::InvalidState(message),
            Some("NOT_FOUND") => AppError::NotFound(message),
            Some("FORBIDDEN") => AppError::Forbidden(message),
            Some(other) => AppError::Server {
                code: other.to_string(),
                message,
            },
            None => AppError::Server {
                code: "SERVER_ERROR".to_string(),
                message,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Network(ref msg) => {
                tracing::error!("Backend unreachable: {}", msg);
                StatusCode::BAD_GATEWAY
            }
            AppError::Server { ref message, .. } => {
                tracing::error!("Backend error: {}", message);
                StatusCode::BAD_GATEWAY
            }
            AppError::Persistence(ref msg) => {
                tracing::error!("Persistence error: {}", msg);
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
