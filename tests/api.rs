use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use mis_auth::{
    api::{router, ApiConfig},
    auth::{AuditAction, AuthConfig, AuthError, AuthService, FederatedAssertion, IdentityProvider},
    store::MemoryCredentialStore,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const CLIENT_ID: &str = "mis-test.apps.googleusercontent.com";

/// Accepts tokens of the form `<sub>|<email>`; codes use the same format.
struct StaticProvider;

#[async_trait]
impl IdentityProvider for StaticProvider {
    fn authorize_url(&self, state: &str) -> Result<String, AuthError> {
        Ok(format!("https://idp.test/authorize?state={state}"))
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<FederatedAssertion, AuthError> {
        let Some((sub, email)) = id_token.split_once('|') else {
            return Err(AuthError::ExternalVerification("malformed token".to_string()));
        };
        Ok(FederatedAssertion {
            subject: sub.to_string(),
            email: email.to_string(),
            email_verified: true,
            given_name: None,
            family_name: None,
            name: Some("Grace Hopper".to_string()),
            picture: None,
            audience: CLIENT_ID.to_string(),
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<FederatedAssertion, AuthError> {
        self.verify_id_token(code).await
    }
}

struct TestApp {
    store: Arc<MemoryCredentialStore>,
    router: Router,
}

fn secret() -> SecretString {
    SecretString::from("k".repeat(32))
}

fn app() -> Result<TestApp> {
    let store = Arc::new(MemoryCredentialStore::new());
    let service = AuthService::new(&AuthConfig::new(secret()), store.clone())?;
    let router = router(Arc::new(service), ApiConfig::default())?;
    Ok(TestApp { store, router })
}

fn federated_app() -> Result<TestApp> {
    let store = Arc::new(MemoryCredentialStore::new());
    let config = AuthConfig::new(secret()).with_google_client_id(Some(CLIENT_ID.to_string()));
    let service =
        AuthService::new(&config, store.clone())?.with_identity_provider(Arc::new(StaticProvider));
    let router = router(Arc::new(service), ApiConfig::default())?;
    Ok(TestApp { store, router })
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "api-test/1.0")
        .header("x-device-id", "device-1")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(body.to_string()))?)
}

async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn register_body(email: &str, password: &str) -> Value {
    json!({
        "email": email,
        "password": password,
        "confirm_password": password,
        "first_name": "Ann",
        "last_name": "Example",
    })
}

fn field<'a>(body: &'a Value, name: &str) -> &'a str {
    body[name].as_str().unwrap_or_default()
}

#[tokio::test]
async fn password_lifecycle_with_rotation_and_replay() -> Result<()> {
    let app = app()?;

    let (status, registered) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("a@x.com", "secret1"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["token_type"], "Bearer");
    assert_eq!(registered["expires_in"], 900);
    assert_eq!(registered["user"]["email"], "a@x.com");
    assert_eq!(registered["user"]["roles"], json!(["user"]));
    assert_eq!(registered["user"]["has_local_password"], true);

    let (status, body) = send(
        &app.router,
        post_json("/v1/auth/login", &json!({"email": "a@x.com", "password": "wrong"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid email or password");

    let (status, login) = send(
        &app.router,
        post_json("/v1/auth/login", &json!({"email": "a@x.com", "password": "secret1"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let first_refresh = field(&login, "refresh_token").to_string();
    assert!(!first_refresh.is_empty());

    let (status, refreshed) = send(
        &app.router,
        post_json("/v1/auth/refresh", &json!({"refresh_token": first_refresh}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let second_refresh = field(&refreshed, "refresh_token").to_string();
    assert_ne!(second_refresh, first_refresh);
    assert_eq!(refreshed["user"]["email"], "a@x.com");

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/refresh", &json!({"refresh_token": first_refresh}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let audit = app.store.audit_log().await;
    let failed_login = audit
        .iter()
        .find(|entry| matches!(entry.action, AuditAction::Login) && !entry.success);
    assert!(failed_login.is_some());
    let failed_login = failed_login.map(|entry| entry.details.clone()).unwrap_or_default();
    assert_eq!(failed_login.as_deref(), Some("invalid password"));

    let register = audit
        .iter()
        .find(|entry| matches!(entry.action, AuditAction::Register));
    assert_eq!(
        register.and_then(|entry| entry.ip_address.clone()).as_deref(),
        Some("203.0.113.7")
    );
    assert_eq!(
        register.and_then(|entry| entry.device_id.clone()).as_deref(),
        Some("device-1")
    );
    Ok(())
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_input() -> Result<()> {
    let app = app()?;

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("dup@x.com", "secret1"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("DUP@x.com", "secret1"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("short@x.com", "abc"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent() -> Result<()> {
    let app = app()?;

    let (_, registered) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("out@x.com", "secret1"))?,
    )
    .await?;
    let refresh = field(&registered, "refresh_token").to_string();

    for _ in 0..2 {
        let (status, body) = send(
            &app.router,
            post_json("/v1/auth/logout", &json!({"refresh_token": refresh}))?,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "ok"}));
    }

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/refresh", &json!({"refresh_token": refresh}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let logouts = app
        .store
        .audit_log()
        .await
        .iter()
        .filter(|entry| matches!(entry.action, AuditAction::Logout))
        .count();
    assert_eq!(logouts, 1);
    Ok(())
}

#[tokio::test]
async fn me_requires_a_valid_bearer_token() -> Result<()> {
    let app = app()?;

    let (_, registered) = send(
        &app.router,
        post_json("/v1/auth/register", &register_body("me@x.com", "secret1"))?,
    )
    .await?;
    let access = field(&registered, "access_token").to_string();

    let request = Request::builder()
        .uri("/v1/me")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())?;
    let (status, body) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "me@x.com");
    assert_eq!(body["first_name"], "Ann");

    let request = Request::builder().uri("/v1/me").body(Body::empty())?;
    let (status, _) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/v1/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())?;
    let (status, _) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let app = app()?;

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["database"], "ok");

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/health")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let app = app()?;

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-123")
    );
    Ok(())
}

#[tokio::test]
async fn federated_routes_unavailable_without_client_id() -> Result<()> {
    let app = app()?;

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/google", &json!({"id_token": "sub-1|g@x.com"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let request = Request::builder()
        .uri("/v1/auth/google/login")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn google_id_token_provisions_then_reuses_account() -> Result<()> {
    let app = federated_app()?;

    let (status, first) = send(
        &app.router,
        post_json("/v1/auth/google", &json!({"id_token": "sub-1|G@x.com"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["user"]["email"], "g@x.com");
    assert_eq!(first["user"]["first_name"], "Grace");
    assert_eq!(first["user"]["last_name"], "Hopper");
    assert_eq!(first["user"]["has_local_password"], false);

    let (status, second) = send(
        &app.router,
        post_json("/v1/auth/google", &json!({"id_token": "sub-1|g@x.com"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["user"]["id"], first["user"]["id"]);

    let (status, _) = send(
        &app.router,
        post_json("/v1/auth/login", &json!({"email": "g@x.com", "password": "anything"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn google_verify_has_no_side_effects() -> Result<()> {
    let app = federated_app()?;

    let (status, body) = send(
        &app.router,
        post_json("/v1/auth/google/verify", &json!({"id_token": "sub-9|v@x.com"}))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sub"], "sub-9");
    assert_eq!(body["email"], "v@x.com");

    assert!(app.store.sessions().await.is_empty());
    assert!(app.store.audit_log().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn google_code_flow_checks_state_cookie() -> Result<()> {
    let app = federated_app()?;

    let request = Request::builder()
        .uri("/v1/auth/google/login")
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(location.starts_with("https://idp.test/authorize?state="));
    let state = location
        .split_once("state=")
        .map(|(_, state)| state.to_string())
        .unwrap_or_default();

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with(&format!("oauth_state={state};")));

    let request = Request::builder()
        .uri("/v1/auth/google/callback?code=sub-2%7Cc%40x.com&state=forged")
        .header(header::COOKIE, format!("oauth_state={state}"))
        .body(Body::empty())?;
    let (status, _) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .uri(format!(
            "/v1/auth/google/callback?code=sub-2%7Cc%40x.com&state={state}"
        ))
        .header(header::COOKIE, format!("oauth_state={state}"))
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cleared.contains("Max-Age=0"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["user"]["email"], "c@x.com");
    Ok(())
}
