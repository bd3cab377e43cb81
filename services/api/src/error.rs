//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;
use visitor_insight_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error from applying migrations at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was understood but its content is unusable.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Port(PortError::Unauthorized) | ApiError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Port(PortError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Port(PortError::InvalidInput(_)) | ApiError::BadRequest(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Port(PortError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {:?}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_map_to_http_statuses() {
        let cases = [
            (PortError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PortError::Unauthorized, StatusCode::UNAUTHORIZED),
            (PortError::Conflict("x".into()), StatusCode::CONFLICT),
            (PortError::InvalidInput("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (PortError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PortError::Unexpected("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
