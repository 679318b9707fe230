use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::auth::{
    principal::require_auth,
    types::{ErrorResponse, MeResponse},
};
use crate::auth::{AuthError, AuthService};

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Missing, invalid or expired bearer token", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Result<Json<MeResponse>, AuthError> {
    let claims = require_auth(&headers, &service)?;
    let user = service.current_user(&claims).await?;
    Ok(Json(MeResponse::from(&user)))
}
