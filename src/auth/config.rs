//! Immutable auth configuration injected at startup.

use chrono::Duration;
use secrecy::SecretString;

use super::error::AuthError;

const DEFAULT_ISSUER: &str = "mis-auth";
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const MAX_REFRESH_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    signing_secret: SecretString,
    previous_signing_secrets: Vec<SecretString>,
    issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    google_client_id: Option<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            signing_secret,
            previous_signing_secrets: Vec::new(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            google_client_id: None,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    /// Keep accepting tokens signed with a retired secret.
    #[must_use]
    pub fn with_previous_signing_secret(mut self, secret: SecretString) -> Self {
        self.previous_signing_secrets.push(secret);
        self
    }

    #[must_use]
    pub fn with_google_client_id(mut self, client_id: Option<String>) -> Self {
        self.google_client_id = client_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub(crate) fn signing_secret(&self) -> &SecretString {
        &self.signing_secret
    }

    pub(crate) fn previous_signing_secrets(&self) -> &[SecretString] {
        &self.previous_signing_secrets
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn google_client_id(&self) -> Option<&str> {
        self.google_client_id.as_deref()
    }

    /// # Errors
    /// Returns `AuthError::Validation` unless the TTL is within 1s and one day.
    pub fn access_token_ttl(&self) -> Result<Duration, AuthError> {
        bounded_ttl(
            "access token TTL",
            self.access_token_ttl_seconds,
            MAX_ACCESS_TOKEN_TTL_SECONDS,
        )
    }

    /// # Errors
    /// Returns `AuthError::Validation` unless the TTL is within 1s and 365 days.
    pub fn refresh_token_ttl(&self) -> Result<Duration, AuthError> {
        bounded_ttl(
            "refresh token TTL",
            self.refresh_token_ttl_seconds,
            MAX_REFRESH_TOKEN_TTL_SECONDS,
        )
    }
}

fn bounded_ttl(name: &str, seconds: i64, max: i64) -> Result<Duration, AuthError> {
    if !(1..=max).contains(&seconds) {
        return Err(AuthError::Validation(format!(
            "{name} must be between 1 and {max} seconds"
        )));
    }
    Duration::try_seconds(seconds)
        .ok_or_else(|| AuthError::Validation(format!("{name} is out of range")))
}
