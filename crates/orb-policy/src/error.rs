//! Policy errors

use orb_core::OrbError;
use thiserror::Error;

/// Errors raised while parsing a witness policy.
///
/// Parsing stops at the first offending token; no partial policy is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unsupported policy token [{token}]")]
    UnknownToken { token: String },

    #[error("invalid arguments in [{token}]: expecting two arguments")]
    InvalidArguments { token: String },

    #[error("invalid number [{raw}] in [{token}]")]
    InvalidNumber { token: String, raw: String },

    #[error("percent [{value}] in [{token}] must be between 0 and 100")]
    PercentOutOfRange { token: String, value: i64 },

    #[error("unknown witness role [{role}] in [{token}]: expecting system or batch")]
    UnknownRole { token: String, role: String },
}

impl From<PolicyError> for OrbError {
    fn from(err: PolicyError) -> Self {
        OrbError::BadRequest(err.to_string())
    }
}
