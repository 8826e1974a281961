//! Pub/sub errors

use orb_core::OrbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PubSubError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PubSubError {
    #[error("service not started")]
    NotStarted,

    #[error("pub/sub is closed")]
    Closed,

    #[error("message exceeded maximum redelivery attempts ({max_retries})")]
    MaxRetriesExceeded { max_retries: u32 },

    #[error("invalid redelivery attempts metadata [{value}]")]
    InvalidAttempts { value: String },
}

impl From<PubSubError> for OrbError {
    fn from(err: PubSubError) -> Self {
        match err {
            PubSubError::NotStarted | PubSubError::Closed => OrbError::NotStarted(err.to_string()),
            other => OrbError::BadRequest(other.to_string()),
        }
    }
}
