//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::services::ServiceError;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A stored value could not be mapped back to its domain type.
    #[error("Corrupt {column} value '{value}'")]
    InvalidValue { column: &'static str, value: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { id, .. } => ServiceError::NotFound(id),
            other => ServiceError::Storage(other.to_string()),
        }
    }
}
