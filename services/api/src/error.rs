//! services/api/src/error.rs
//!
//! Defines the startup error type for the API service and the error response
//! returned by the HTTP handlers.

use crate::config::ConfigError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stage_booking_core::{BookingError, PortError};
use tracing::error;
use utoipa::ToSchema;

/// The primary error type for starting the `api` service.
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

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

//=========================================================================================
// Handler Error Responses
//=========================================================================================

/// The JSON body of every error answered by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `NO_PLACES_AVAILABLE`.
    pub error: String,
    pub message: String,
}

/// An error leaving a handler: a status code plus an `ErrorBody`.
#[derive(Debug)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Authentication required")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

fn status_for(err: &BookingError) -> StatusCode {
    match err {
        BookingError::Validation(_) => StatusCode::BAD_REQUEST,
        BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        BookingError::Forbidden | BookingError::Port(PortError::Unauthorized) => {
            StatusCode::FORBIDDEN
        }
        BookingError::AlreadyPaid
        | BookingError::NotPaid
        | BookingError::NoPlacesAvailable
        | BookingError::MismatchedIds
        | BookingError::AlreadyReserved
        | BookingError::Conflict(_) => StatusCode::CONFLICT,
        BookingError::Gateway(_) => StatusCode::BAD_GATEWAY,
        BookingError::NotificationFailed(_)
        | BookingError::CompensationFailed { .. }
        | BookingError::Port(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BookingError> for ErrorResponse {
    fn from(err: BookingError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!("Request failed: {:?}", err);
        }
        // Infrastructure details stay in the logs.
        let message = match &err {
            BookingError::Port(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        Self::new(status, err.code(), message)
    }
}

impl From<PortError> for ErrorResponse {
    fn from(err: PortError) -> Self {
        BookingError::from(err).into()
    }
}

/// Malformed JSON bodies are answered with the API's own error shape.
impl From<JsonRejection> for ErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn state_conflicts_map_to_409() {
        for err in [
            BookingError::AlreadyPaid,
            BookingError::NoPlacesAvailable,
            BookingError::MismatchedIds,
        ] {
            let response = ErrorResponse::from(err);
            assert_eq!(response.status, StatusCode::CONFLICT);
        }
    }

    #[test]
    fn compensation_failure_is_a_server_error() {
        let response = ErrorResponse::from(BookingError::CompensationFailed {
            reservation_id: Uuid::new_v4(),
            stage_id: Uuid::new_v4(),
        });
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body.error, "COMPENSATION_FAILED");
    }

    #[test]
    fn port_errors_hide_details() {
        let response = ErrorResponse::from(BookingError::Port(PortError::Unexpected(
            "connection refused to 10.0.0.3".to_string(),
        )));
        assert_eq!(response.body.error, "INTERNAL_ERROR");
        assert!(!response.body.message.contains("10.0.0.3"));
    }
}
