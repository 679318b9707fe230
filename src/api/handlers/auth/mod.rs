//! Authentication endpoints.
//!
//! Handlers translate HTTP into [`AuthService`](crate::auth::AuthService)
//! calls and map [`AuthError`] onto status codes. Credential and token failures
//! all render as 401 with a fixed message; internal failures render as 500 and
//! keep their detail in the logs.

pub mod google;
pub mod login;
pub mod principal;
pub mod register;
pub mod session;
pub mod types;
pub mod utils;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error};

use crate::auth::AuthError;
use types::ErrorResponse;

const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

impl AuthError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::InvalidRefreshToken
            | Self::InvalidToken
            | Self::ExternalVerification(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::FederationDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Signing | Self::Hashing(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_internal() {
            match &self {
                Self::Store(err) => error!("Credential store failure: {err:#}"),
                other => error!("Internal auth failure: {other}"),
            }
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            debug!(%status, "auth request rejected: {self}");
            self.to_string()
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// Rejection for a missing or undecodable JSON body.
pub(crate) fn missing_payload() -> AuthError {
    AuthError::Validation("missing or invalid payload".to_string())
}
