use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

use super::{GoogleClaims, GoogleConfig, SCOPES};
use crate::auth::{AuthError, FederatedAssertion, IdentityProvider};
use crate::APP_USER_AGENT;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GoogleClient {
    http: Client,
    config: GoogleConfig,
}

impl GoogleClient {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: GoogleConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Ask Google to validate an ID token and return its claims.
    #[instrument(skip_all)]
    async fn tokeninfo(&self, id_token: &str) -> Result<GoogleClaims, AuthError> {
        let response = self
            .http
            .get(&self.config.tokeninfo_endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(provider_unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            debug!(
                %status,
                "tokeninfo rejected id token: {}",
                body["error_description"].as_str().unwrap_or_default()
            );
            return Err(AuthError::ExternalVerification(format!(
                "id token rejected ({status})"
            )));
        }

        response.json::<GoogleClaims>().await.map_err(|err| {
            error!("Failed to decode tokeninfo response: {err}");
            AuthError::ExternalVerification("malformed tokeninfo response".to_string())
        })
    }
}

fn provider_unreachable(err: reqwest::Error) -> AuthError {
    error!("Identity provider request failed: {err}");
    AuthError::ExternalVerification("identity provider unreachable".to_string())
}

#[async_trait]
impl IdentityProvider for GoogleClient {
    fn authorize_url(&self, state: &str) -> Result<String, AuthError> {
        let url = Url::parse_with_params(
            &self.config.auth_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
                ("access_type", "online"),
            ],
        )
        .map_err(|err| AuthError::ExternalVerification(format!("invalid authorize url: {err}")))?;
        Ok(url.into())
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<FederatedAssertion, AuthError> {
        if id_token.trim().is_empty() {
            return Err(AuthError::ExternalVerification("empty id token".to_string()));
        }
        self.tokeninfo(id_token).await?.into_assertion()
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<FederatedAssertion, AuthError> {
        let Some(secret) = self.config.client_secret.as_ref() else {
            return Err(AuthError::FederationDisabled);
        };

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", secret.expose_secret()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(provider_unreachable)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                return Err(AuthError::ExternalVerification(
                    "authorization code rejected".to_string(),
                ));
            }
            status => {
                return Err(AuthError::ExternalVerification(format!(
                    "token endpoint returned {status}"
                )));
            }
        }

        let tokens: TokenResponse = response.json().await.map_err(|err| {
            error!("Failed to decode token response: {err}");
            AuthError::ExternalVerification("malformed token response".to_string())
        })?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| AuthError::ExternalVerification("no id_token in token response".to_string()))?;

        self.verify_id_token(&id_token).await
    }
}
