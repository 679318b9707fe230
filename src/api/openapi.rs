#![allow(clippy::needless_for_each)]

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[allow(unused_imports)]
use super::handlers::{
    auth::{
        google::{
            __path_google_auth, __path_google_callback, __path_google_login, __path_google_verify,
        },
        login::__path_login,
        register::__path_register,
        session::{__path_logout, __path_refresh},
        types,
    },
    health::{self, __path_health},
    me::__path_me,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        register,
        login,
        google_auth,
        google_login,
        google_callback,
        google_verify,
        refresh,
        logout,
        me
    ),
    components(
        schemas(
            health::Health,
            types::RegisterRequest,
            types::LoginRequest,
            types::GoogleAuthRequest,
            types::RefreshRequest,
            types::TokenResponse,
            types::UserView,
            types::MeResponse,
            types::GoogleProfile,
            types::MessageResponse,
            types::ErrorResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Password login, registration and session lifecycle"),
        (name = "google", description = "Google sign-in"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
