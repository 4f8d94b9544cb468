//! Error types for the PostgreSQL backend.

use geoexports_storage::StorageError;
use sqlx_core::error::Error as SqlxError;

use crate::sql_builder::SqlBuilderError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for undefined column (42703).
pub const PG_UNDEFINED_COLUMN: &str = "42703";

/// PostgreSQL error code for insufficient privilege (42501).
pub const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error means the relation cannot be read at all.
pub fn is_unreadable_relation(err: &SqlxError) -> bool {
    [PG_UNDEFINED_TABLE, PG_UNDEFINED_COLUMN, PG_INSUFFICIENT_PRIVILEGE]
        .iter()
        .any(|code| has_pg_error_code(err, code))
}

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::error::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Query construction error: {0}")]
    Sql(#[from] SqlBuilderError),
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Database(SqlxError::PoolTimedOut | SqlxError::PoolClosed) => {
                StorageError::connection_error(err.to_string())
            }
            PostgresError::Database(SqlxError::Io(e)) => StorageError::connection_error(e.to_string()),
            PostgresError::Database(e) => StorageError::internal(e.to_string()),
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
            PostgresError::Sql(e) => StorageError::invalid_record(e.to_string()),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
