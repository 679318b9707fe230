use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{
    missing_payload,
    types::{ErrorResponse, RegisterRequest, TokenResponse},
    utils::provenance,
};
use crate::auth::{AuthError, AuthService, Registration};

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = TokenResponse),
        (status = 200, description = "Password attached to an existing federated account", body = TokenResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<TokenResponse>), AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };

    let registration = Registration {
        email: request.email,
        password: request.password,
        confirm_password: request.confirm_password,
        first_name: request.first_name,
        last_name: request.last_name,
        external_sub: request.external_sub,
    };

    let outcome = service.register(registration, &provenance(&headers)).await?;
    let status = if outcome.linked {
        info!(user_id = outcome.bundle.user.id, "password linked to federated account");
        StatusCode::OK
    } else {
        info!(user_id = outcome.bundle.user.id, "user registered");
        StatusCode::CREATED
    };
    Ok((status, Json(outcome.bundle.into())))
}
