//! Error taxonomy shared by every auth flow.

use thiserror::Error;

/// Failures surfaced to the transport layer.
///
/// Credential, code, and token mismatches all map to [`AuthError::Unauthorized`]
/// with deliberately generic messages so callers cannot probe which factor
/// failed or whether an account exists.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A referenced tenant does not exist.
    #[error("{0}")]
    NotFound(&'static str),

    /// Malformed input or a flow-sequencing error (e.g. confirming 2FA
    /// before setup was started).
    #[error("{0}")]
    BadRequest(&'static str),

    /// Throttling triggered for the caller's challenge key.
    #[error("{0}")]
    RateLimited(&'static str),

    /// Any credential, token, or code failure.
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Storage or signing failure; never caused by caller input.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::AuthError;

    #[test]
    fn messages_pass_through() {
        assert_eq!(
            AuthError::Unauthorized("Invalid credentials").to_string(),
            "Invalid credentials"
        );
        assert_eq!(
            AuthError::RateLimited("OTP request limit exceeded").to_string(),
            "OTP request limit exceeded"
        );
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err = AuthError::from(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.to_string(), "connection reset");
    }
}
