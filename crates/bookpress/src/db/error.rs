//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded back into a record.
    #[error("Corrupt {column} in row '{id}': {reason}")]
    Corrupt {
        id: String,
        column: &'static str,
        reason: String,
    },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Errors surfaced by the job and order repositories.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("{0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Repository task failed: {0}")]
    Task(String),
}

impl RepositoryError {
    pub fn job_not_found(id: &str) -> Self {
        RepositoryError::NotFound {
            kind: "Job",
            id: id.to_string(),
        }
    }

    pub fn order_not_found(id: &str) -> Self {
        RepositoryError::NotFound {
            kind: "Order",
            id: id.to_string(),
        }
    }
}
