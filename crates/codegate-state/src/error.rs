//! Error types for codegate-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No artifact stored under the key
    #[error("artifact not found: {key}")]
    NotFound { key: String },

    /// Key is empty, absolute, or escapes the store root
    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },

    /// Unknown validation status string read back from a backend
    #[error("unknown validation status: {0}")]
    UnknownStatus(String),

    /// Backend (database) failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Filesystem failure
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
