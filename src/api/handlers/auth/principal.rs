//! Bearer-token guard for protected endpoints.

use axum::http::HeaderMap;

use super::utils::bearer_token;
use crate::auth::{AccessClaims, AuthError, AuthService};

/// Verify the bearer access token on a request.
///
/// Missing, malformed, forged and expired tokens are all `InvalidToken`.
pub fn require_auth(headers: &HeaderMap, service: &AuthService) -> Result<AccessClaims, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::InvalidToken)?;
    service.authenticate(token)
}
