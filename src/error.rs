use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid token")]
    InvalidToken,

    // Conversation errors
    #[error("Conversation not found")]
    ConversationNotFound,
    #[error("Not a participant")]
    NotParticipant,

    // Validation errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Conflict: {0}")]
    Conflict(String),

    // Connection / store availability
    #[error("Transient failure: {0}")]
    Transient(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Error classes shared by the HTTP API, the duplex channel and the client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidArgument,
    Conflict,
    Transient,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Only connection and availability failures are worth retrying; store-level
    /// rejections are terminal.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Error body carried by `messageError` and `operationError` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthorized | AppError::InvalidToken | AppError::Jwt(_) => {
                ErrorKind::Unauthorized
            }
            AppError::ConversationNotFound => ErrorKind::NotFound,
            AppError::NotParticipant => ErrorKind::Forbidden,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Transient(_) | AppError::Redis(_) => ErrorKind::Transient,
            AppError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                    ErrorKind::Transient
                }
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            AppError::Serialization(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to a client. Backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::Transient => match self {
                AppError::Transient(msg) => msg.clone(),
                _ => "Service temporarily unavailable".to_string(),
            },
            _ => self.to_string(),
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.public_message(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            // 400 Bad Request
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,

            // 404 Not Found
            ErrorKind::NotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            ErrorKind::Conflict => StatusCode::CONFLICT,

            // 503 Service Unavailable
            ErrorKind::Transient => {
                tracing::warn!("Transient error: {}", self);
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            ErrorKind::Internal => {
                tracing::error!("Internal error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.public_message()
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
