use crate::audit::errors::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Credentials present but unusable
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Request failed normalization; nothing was dispatched
    #[error("{message}")]
    BadRequest { message: String },

    /// Ownership guardrail rejected the caller before any provider call
    #[error("Ownership guardrail rejected request: {reason}")]
    Ownership { reason: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Audit store error
    #[error(transparent)]
    Database(#[from] StoreError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Ownership { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                // Results are never returned without their audit trail
                StoreError::UniqueViolation { .. } | StoreError::OwnershipViolation { .. } | StoreError::InvalidUnit { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                StoreError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::BadRequest { message } => message.clone(),
            Error::Ownership { reason } => reason.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                StoreError::NotFound => "Resource not found".to_string(),
                StoreError::OwnershipViolation { .. } => "Audit trail rejected: request ownership could not be verified".to_string(),
                _ => "Failed to record audit trail".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Machine-readable error code included in JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::BadRequest { .. } => "validation_error",
            Error::Ownership { .. } => "ownership_guardrail",
            Error::NotFound { .. } => "not_found",
            Error::Database(StoreError::OwnershipViolation { .. }) => "ownership_guardrail",
            Error::Database(_) => "store_error",
            Error::Internal { .. } | Error::Other(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unauthenticated { .. } | Error::Ownership { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.user_message(),
            }
        });
        (status, axum::response::Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
