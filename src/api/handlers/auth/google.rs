//! Google sign-in: ID-token mode, authorization-code redirect mode, and
//! side-effect-free token verification.

use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, instrument, warn};

use super::{
    missing_payload,
    types::{CallbackParams, ErrorResponse, GoogleAuthRequest, GoogleProfile, TokenResponse},
    utils::{clear_state_cookie, extract_cookie, provenance, state_cookie, STATE_COOKIE_NAME},
};
use crate::api::ApiConfig;
use crate::auth::{AuthError, AuthService};
use crate::google::generate_state;

#[utoipa::path(
    post,
    path = "/v1/auth/google",
    request_body = GoogleAuthRequest,
    responses(
        (status = 200, description = "Authenticated with a Google ID token", body = TokenResponse),
        (status = 401, description = "ID token rejected", body = ErrorResponse),
        (status = 503, description = "Google sign-in is not configured", body = ErrorResponse),
    ),
    tag = "google"
)]
#[instrument(skip_all)]
pub async fn google_auth(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<GoogleAuthRequest>>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    let bundle = service
        .federate_id_token(&request.id_token, &provenance(&headers))
        .await?;
    Ok(Json(bundle.into()))
}

#[utoipa::path(
    get,
    path = "/v1/auth/google/login",
    responses(
        (status = 307, description = "Redirect to Google consent screen"),
        (status = 503, description = "Google sign-in is not configured", body = ErrorResponse),
    ),
    tag = "google"
)]
pub async fn google_login(
    service: Extension<Arc<AuthService>>,
    config: Extension<ApiConfig>,
) -> Result<Response, AuthError> {
    if !service.federation_enabled() {
        return Err(AuthError::FederationDisabled);
    }

    let state = match generate_state() {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to generate OAuth state: {err}");
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("failed to generate state")),
            )
                .into_response());
        }
    };
    let url = service.federated_authorize_url(&state)?;

    let mut headers = HeaderMap::new();
    match state_cookie(&state, config.secure_cookies) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build state cookie: {err}");
            return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    }

    Ok((headers, Redirect::temporary(&url)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/google/callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Authenticated through the authorization-code flow", body = TokenResponse),
        (status = 400, description = "Missing code or state mismatch", body = ErrorResponse),
        (status = 401, description = "Code exchange or ID token verification failed", body = ErrorResponse),
        (status = 503, description = "Google sign-in is not configured", body = ErrorResponse),
    ),
    tag = "google"
)]
#[instrument(skip_all)]
pub async fn google_callback(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    config: Extension<ApiConfig>,
    params: Option<Query<CallbackParams>>,
) -> Result<(HeaderMap, Json<TokenResponse>), AuthError> {
    let params = params.map(|Query(params)| params).unwrap_or_default();

    if let Some(denied) = params.error {
        warn!("Google authorization failed: {denied}");
        return Err(AuthError::ExternalVerification(format!(
            "authorization failed: {denied}"
        )));
    }

    let cookie_state = extract_cookie(&headers, STATE_COOKIE_NAME);
    let state_matches = matches!(
        (cookie_state.as_deref(), params.state.as_deref()),
        (Some(expected), Some(actual)) if !expected.is_empty() && expected == actual
    );
    if !state_matches {
        return Err(AuthError::Validation("invalid state parameter".to_string()));
    }

    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return Err(AuthError::Validation("missing authorization code".to_string()));
    };

    let bundle = service.federate_code(&code, &provenance(&headers)).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_state_cookie(config.secure_cookies) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((response_headers, Json(bundle.into())))
}

#[utoipa::path(
    post,
    path = "/v1/auth/google/verify",
    request_body = GoogleAuthRequest,
    responses(
        (status = 200, description = "ID token is valid for this client", body = GoogleProfile),
        (status = 401, description = "ID token rejected", body = ErrorResponse),
        (status = 503, description = "Google sign-in is not configured", body = ErrorResponse),
    ),
    tag = "google"
)]
pub async fn google_verify(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<GoogleAuthRequest>>,
) -> Result<Json<GoogleProfile>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(missing_payload());
    };
    let assertion = service.verify_federated(&request.id_token).await?;
    Ok(Json(assertion.into()))
}
