use thiserror::Error;

/// Failures surfaced by the authentication core.
///
/// Credential and token failures carry no detail on purpose: callers must not
/// be able to tell an expired token from a revoked or unknown one.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("email already registered")]
    Conflict,
    #[error("{0}")]
    Validation(String),
    #[error("failed to sign token")]
    Signing,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("identity provider verification failed: {0}")]
    ExternalVerification(String),
    #[error("federated login is not configured")]
    FederationDisabled,
    #[error("credential store error")]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    /// Internal failures are fatal to the request and reported as service errors.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Signing | Self::Hashing(_) | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_share_one_message() {
        assert_eq!(
            AuthError::InvalidRefreshToken.to_string(),
            "invalid or expired refresh token"
        );
        assert_eq!(AuthError::InvalidToken.to_string(), "invalid or expired token");
    }

    #[test]
    fn internal_classification() {
        assert!(AuthError::Signing.is_internal());
        assert!(AuthError::Hashing("rng".to_string()).is_internal());
        assert!(AuthError::Store(anyhow::anyhow!("down")).is_internal());
        assert!(!AuthError::InvalidCredentials.is_internal());
        assert!(!AuthError::Conflict.is_internal());
        assert!(!AuthError::ExternalVerification("aud".to_string()).is_internal());
    }
}
