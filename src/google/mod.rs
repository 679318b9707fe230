//! Google as the federated identity provider.
//!
//! ID tokens are verified through Google's tokeninfo endpoint; the
//! authorization-code flow exchanges the code for an ID token and verifies it
//! the same way, so both login modes share one audience check.

mod claims;
mod client;

pub use claims::GoogleClaims;
pub use client::GoogleClient;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use std::fmt;

pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";
pub const SCOPES: &str = "openid email profile";
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/v1/auth/google/callback";

const STATE_BYTES: usize = 32;

#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub redirect_url: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub tokeninfo_endpoint: String,
}

impl GoogleConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: Option<SecretString>, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            tokeninfo_endpoint: TOKENINFO_ENDPOINT.to_string(),
        }
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

/// Random CSRF state for the authorization redirect.
///
/// # Errors
/// Returns an error when the OS random source fails.
pub fn generate_state() -> Result<String, rand::Error> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
