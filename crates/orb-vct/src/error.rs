//! VCT errors

use orb_core::OrbError;
use orb_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VctError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VctError {
    /// Connection failure, timeout or 5xx from the log
    #[error("log unavailable: {0}")]
    Unavailable(String),

    #[error("log rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid log response: {0}")]
    InvalidResponse(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("invalid log endpoint [{endpoint}]: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("consistency verification failed: {0}")]
    Consistency(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("log monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("storage: {0}")]
    Storage(String),
}

impl VctError {
    /// Check if retrying may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Storage(_))
    }
}

impl From<StorageError> for VctError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::MonitorNotFound(key),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<VctError> for OrbError {
    fn from(err: VctError) -> Self {
        match err {
            VctError::Unavailable(_) | VctError::Storage(_) => OrbError::Transient(err.to_string()),
            VctError::MonitorNotFound(_) => OrbError::NotFound(err.to_string()),
            VctError::Signing(_) => OrbError::Internal(err.to_string()),
            other => OrbError::BadRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(VctError::Unavailable("connection refused".into()).is_transient());
        assert!(!VctError::InvalidCredential("not json".into()).is_transient());
        assert!(!VctError::Rejected {
            status: 400,
            body: "bad".into()
        }
        .is_transient());

        let err: OrbError = VctError::Unavailable("timeout".into()).into();
        assert!(err.is_transient());

        let err: OrbError = VctError::Consistency("root mismatch".into()).into();
        assert!(matches!(err, OrbError::BadRequest(_)));

        let err: VctError = StorageError::NotFound("https://vct.example.com".into()).into();
        assert!(matches!(err, VctError::MonitorNotFound(_)));
    }
}
