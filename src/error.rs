/// Unified error types for Review Desk
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the moderation engine and its HTTP surface
#[derive(Error, Debug)]
pub enum DeskError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or invalid caller identity
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller's role lacks the capability for the action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Missing or invalid field
    #[error("Validation error: {0}")]
    Validation(String),

    /// A pending request already targets the same entity
    #[error("A pending request already exists for {entity_type} {entity_id}")]
    DuplicatePendingRequest { entity_type: String, entity_id: i64 },

    /// Unknown request, entity or topic
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request left the pending state before this resolution
    #[error("Moderation request {0} has already been resolved")]
    AlreadyResolved(i64),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeskError {
    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            DeskError::Validation(_) => "ValidationError",
            DeskError::DuplicatePendingRequest { .. } => "DuplicatePendingRequest",
            DeskError::NotFound(_) => "NotFound",
            DeskError::AlreadyResolved(_) => "AlreadyResolved",
            DeskError::Unauthorized(_) => "Unauthorized",
            DeskError::Authentication(_) => "AuthenticationRequired",
            DeskError::RateLimited { .. } => "RateLimited",
            DeskError::Database(_) | DeskError::Internal(_) | DeskError::Io(_) => {
                "InternalServerError"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DeskError::Validation(_) => StatusCode::BAD_REQUEST,
            DeskError::DuplicatePendingRequest { .. } | DeskError::AlreadyResolved(_) => {
                StatusCode::CONFLICT
            }
            DeskError::NotFound(_) => StatusCode::NOT_FOUND,
            DeskError::Unauthorized(_) => StatusCode::FORBIDDEN,
            DeskError::Authentication(_) => StatusCode::UNAUTHORIZED,
            DeskError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            DeskError::Database(_) | DeskError::Internal(_) | DeskError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert DeskError to HTTP response
impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            DeskError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string() // Don't leak details
            }
            DeskError::Internal(_) | DeskError::Io(_) => {
                tracing::error!("{}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message,
        });

        let mut response = (status, body).into_response();
        if let DeskError::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for Review Desk operations
pub type DeskResult<T> = Result<T, DeskError>;

/// Map a unique-index violation on the pending-request index to a duplicate error
pub(crate) fn map_pending_conflict(err: sqlx::Error, entity_type: &str, entity_id: i64) -> DeskError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DeskError::DuplicatePendingRequest {
                entity_type: entity_type.to_string(),
                entity_id,
            }
        }
        _ => DeskError::Database(err),
    }
}
