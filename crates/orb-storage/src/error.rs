//! Storage errors

use orb_core::OrbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("data not found: {0}")]
    NotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Storage failures are transient for callers, apart from missing data and
/// malformed queries which retrying cannot fix.
impl From<StorageError> for OrbError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => OrbError::NotFound(what),
            StorageError::InvalidQuery(q) => OrbError::BadRequest(format!("invalid query: {q}")),
            other => OrbError::Transient(other.to_string()),
        }
    }
}
