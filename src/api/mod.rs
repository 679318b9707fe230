//! HTTP surface: router, middleware stack and server loop.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::auth::AuthService;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::{
    auth::{google, login, register, session, utils::DEVICE_ID_HEADER},
    health, me,
};

/// Settings for the HTTP layer only; the auth core never sees them.
#[derive(Clone, Debug, Default)]
pub struct ApiConfig {
    /// Exact origin allowed by CORS. Any origin is allowed when unset.
    pub cors_origin: Option<String>,
    /// Mark the OAuth state cookie `Secure`.
    pub secure_cookies: bool,
}

/// Build the application router with all routes and layers.
///
/// # Errors
/// Returns an error when the configured CORS origin is not a valid URL.
pub fn router(service: Arc<AuthService>, config: ApiConfig) -> Result<Router> {
    let cors = cors_layer(config.cors_origin.as_deref())?;

    let app = Router::new()
        .route("/v1/auth/register", post(register::register))
        .route("/v1/auth/login", post(login::login))
        .route("/v1/auth/google", post(google::google_auth))
        .route("/v1/auth/google/login", get(google::google_login))
        .route("/v1/auth/google/callback", get(google::google_callback))
        .route("/v1/auth/google/verify", post(google::google_verify))
        .route("/v1/auth/refresh", post(session::refresh))
        .route("/v1/auth/logout", post(session::logout))
        .route("/v1/me", get(me::me))
        .route("/health", get(health::health).options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(config))
                .layer(Extension(service)),
        );

    Ok(app)
}

/// Start the server and run until SIGINT/SIGTERM.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, service: Arc<AuthService>, config: ApiConfig) -> Result<()> {
    let app = router(service, config)?;

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(DEVICE_ID_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    match origin.map(str::trim).filter(|origin| !origin.is_empty()) {
        Some(origin) => Ok(cors
            .allow_origin(AllowOrigin::exact(origin_header(origin)?))
            .allow_credentials(true)),
        None => Ok(cors.allow_origin(Any)),
    }
}

fn origin_header(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("CORS origin must include a host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    HeaderValue::from_str(&format!("{}://{}{}", parsed.scheme(), host, port))
        .context("Failed to build CORS origin header")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_strips_path() -> Result<()> {
        let value = origin_header("https://mis.example.com:8443/app/")?;
        assert_eq!(value, "https://mis.example.com:8443");
        Ok(())
    }

    #[test]
    fn origin_header_rejects_garbage() {
        assert!(origin_header("not a url").is_err());
    }

    #[test]
    fn cors_layer_accepts_missing_origin() {
        assert!(cors_layer(None).is_ok());
        assert!(cors_layer(Some("  ")).is_ok());
        assert!(cors_layer(Some("http://localhost:3000")).is_ok());
    }
}
