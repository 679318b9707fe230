//! Refresh-token rotation and logout.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::{error, instrument};

use super::{
    missing_payload,
    types::{ErrorResponse, MessageResponse, RefreshRequest, TokenResponse},
    utils::provenance,
};
use crate::auth::{AuthError, AuthService};

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair; the presented refresh token is revoked", body = TokenResponse),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    if request.refresh_token.trim().is_empty() {
        return Err(AuthError::InvalidRefreshToken);
    }
    let bundle = service
        .refresh(&request.refresh_token, &provenance(&headers))
        .await?;
    Ok(Json(bundle.into()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session revoked, or nothing to revoke", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Json<MessageResponse> {
    // Logout never reveals whether the token was valid.
    if let Some(Json(request)) = payload {
        if let Err(err) = service
            .logout(&request.refresh_token, &provenance(&headers))
            .await
        {
            error!("Failed to revoke session: {err}");
        }
    }
    Json(MessageResponse::ok())
}
