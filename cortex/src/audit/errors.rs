use crate::types::ApiKeyId;
use thiserror::Error;

/// Unified error type for audit store operations that application code can handle
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A request row carries an API key whose recorded owner is a different user (or no one)
    #[error("Ownership violation for API key {api_key_id}: {message}")]
    OwnershipViolation { api_key_id: ApiKeyId, message: String },

    /// The audit unit is internally inconsistent and was not written
    #[error("Invalid audit unit: {message}")]
    InvalidUnit { message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            // All other sqlx errors are non-recoverable - convert to anyhow with context
            _ => StoreError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for audit store results
pub type Result<T> = std::result::Result<T, StoreError>;
