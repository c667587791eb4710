//! Error taxonomy shared by ingestion, retrieval, and session handling.
//!
//! Storage backends report failures as [`anyhow::Error`]; those surface
//! here as [`Error::Storage`]. Every other variant is a domain outcome the
//! caller is expected to branch on.

use std::time::Duration;

/// Result alias used across the core crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or oversized input, rejected before any state is written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The reference does not resolve, or resolves in another tenant.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Refresh token string is unknown, or its owner is no longer valid.
    #[error("invalid refresh token")]
    InvalidToken,

    #[error("refresh token expired")]
    TokenExpired,

    /// An already-rotated or revoked refresh token was presented again.
    /// The whole family has been revoked by the time this is returned.
    #[error("refresh token reuse detected")]
    TokenReuseDetected,

    /// Access token missing, malformed, expired, or out of date with the
    /// live user record.
    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// An embedding no longer matches its chunk. Recoverable by re-embedding.
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// True for every failure of the refresh protocol and access-token
    /// checks. The HTTP layer maps all of these to the same 401 response.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidToken | Error::TokenExpired | Error::TokenReuseDetected | Error::Unauthorized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_are_auth_failures() {
        assert!(Error::InvalidToken.is_auth_failure());
        assert!(Error::TokenExpired.is_auth_failure());
        assert!(Error::TokenReuseDetected.is_auth_failure());
        assert!(Error::Unauthorized.is_auth_failure());
        assert!(!Error::NotFound("document").is_auth_failure());
        assert!(!Error::InvalidInput("x".into()).is_auth_failure());
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: Error = anyhow::anyhow!("disk full").into();
        assert_eq!(err.to_string(), "disk full");
    }
}
