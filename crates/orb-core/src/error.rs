//! Error types shared by the Orb witnessing crates

use thiserror::Error;

/// Result type alias for Orb operations
pub type Result<T> = std::result::Result<T, OrbError>;

/// Errors surfaced across crate boundaries.
///
/// Every variant is either transient (retrying may succeed) or permanent.
/// Schedulers use [`OrbError::is_transient`] to decide between retrying a
/// message and dead-lettering it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrbError {
    /// Storage hiccup, network failure, log unavailable
    #[error("transient: {0}")]
    Transient(String),

    /// Malformed input or policy violation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Service was used outside of its started state
    #[error("service not started: {0}")]
    NotStarted(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrbError {
    /// Build a transient error from anything displayable
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    /// Build a bad-request error from anything displayable
    pub fn bad_request(err: impl std::fmt::Display) -> Self {
        Self::BadRequest(err.to_string())
    }

    /// Check if retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Check if the error signals a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for OrbError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("json: {err}"))
    }
}
