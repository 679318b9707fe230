//! Request flows of the authentication core.
//!
//! Each public method is one inbound operation: validate the credential,
//! consult the store, mint tokens, persist the session and audit the outcome.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::audit::AuditRecorder;
use super::clock::{Clock, SystemClock};
use super::config::AuthConfig;
use super::error::AuthError;
use super::models::{AuditAction, NewUser, RequestProvenance, Roles, User};
use super::password::{hash_password, verify_password};
use super::reconciler::{FederatedAssertion, IdentityProvider, Reconciler, Reconciliation};
use super::session::SessionManager;
use super::token::{AccessClaims, TokenIssuer};
use super::utils::{normalize_email, valid_email, MIN_PASSWORD_LENGTH};
use crate::store::{CreateUserOutcome, CredentialStore};

/// Tokens handed to a client after any successful authentication.
#[derive(Debug)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: User,
}

#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    pub external_sub: Option<String>,
}

#[derive(Debug)]
pub struct RegisterOutcome {
    pub bundle: TokenBundle,
    /// True when a password was attached to an existing federated account
    /// instead of creating a new one.
    pub linked: bool,
}

struct Federation {
    provider: Arc<dyn IdentityProvider>,
    reconciler: Reconciler,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    issuer: Arc<TokenIssuer>,
    sessions: SessionManager,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    client_id: Option<String>,
    federation: Option<Federation>,
}

impl AuthService {
    /// Build the service with the system clock.
    ///
    /// # Errors
    /// Returns `AuthError::Validation` when a signing secret is too short or a
    /// TTL is out of bounds.
    pub fn new(config: &AuthConfig, store: Arc<dyn CredentialStore>) -> Result<Self, AuthError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// # Errors
    /// Returns `AuthError::Validation` when a signing secret is too short or a
    /// TTL is out of bounds.
    pub fn with_clock(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let access_ttl = config.access_token_ttl()?;
        let refresh_ttl = config.refresh_token_ttl()?;

        let mut issuer = TokenIssuer::new(
            config.signing_secret().clone(),
            config.issuer(),
            access_ttl,
        )?;
        for previous in config.previous_signing_secrets() {
            issuer = issuer.with_previous_secret(previous.clone())?;
        }
        let issuer = Arc::new(issuer);

        let sessions = SessionManager::new(store.clone(), issuer.clone(), clock.clone(), refresh_ttl);

        Ok(Self {
            audit: AuditRecorder::new(store.clone()),
            store,
            issuer,
            sessions,
            clock,
            client_id: config.google_client_id().map(ToString::to_string),
            federation: None,
        })
    }

    /// Enable federated login. Ignored when no client id is configured since
    /// assertions could not be checked against an audience.
    #[must_use]
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        match self.client_id.clone() {
            Some(client_id) => {
                let reconciler = Reconciler::new(self.store.clone(), self.clock.clone(), client_id);
                self.federation = Some(Federation {
                    provider,
                    reconciler,
                });
            }
            None => warn!("identity provider supplied without a client id, federated login disabled"),
        }
        self
    }

    #[must_use]
    pub fn federation_enabled(&self) -> bool {
        self.federation.is_some()
    }

    /// Create a local account, or attach a password to the federated account
    /// that owns `external_sub`.
    ///
    /// # Errors
    /// `Validation` for malformed input, `Conflict` when the email belongs to
    /// an unrelated account, `Hashing`/`Signing`/`Store` on internal failure.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        registration: Registration,
        provenance: &RequestProvenance,
    ) -> Result<RegisterOutcome, AuthError> {
        let email = validate_registration(&registration)?;
        let external_sub = registration
            .external_sub
            .as_deref()
            .map(str::trim)
            .filter(|sub| !sub.is_empty());

        if let Some(mut user) = self.store.find_user_by_email(&email).await? {
            let linkable = external_sub.is_some() && user.external_sub.as_deref() == external_sub;
            if !linkable {
                return Err(AuthError::Conflict);
            }
            if !user.is_active {
                return Err(AuthError::InvalidCredentials);
            }

            user.password_hash = Some(hash_password(&registration.password)?);
            user.has_local_password = true;
            user.last_login = Some(self.clock.now());
            let user = self.store.update_user(&user).await?;

            self.audit
                .record(
                    user.id,
                    AuditAction::PasswordReset,
                    true,
                    provenance,
                    Some("password set for federated account"),
                )
                .await;
            let bundle = self.issue_bundle(user, provenance).await?;
            return Ok(RegisterOutcome {
                bundle,
                linked: true,
            });
        }

        let draft = NewUser {
            email,
            password_hash: Some(hash_password(&registration.password)?),
            external_sub: external_sub.map(ToString::to_string),
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            has_local_password: true,
            roles: Roles::default(),
            last_login: Some(self.clock.now()),
        };
        let user = match self.store.create_user(draft).await? {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::Conflict => return Err(AuthError::Conflict),
        };

        self.audit
            .record(user.id, AuditAction::Register, true, provenance, None)
            .await;
        let bundle = self.issue_bundle(user, provenance).await?;
        Ok(RegisterOutcome {
            bundle,
            linked: false,
        })
    }

    /// Password login.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown email, wrong password, inactive
    /// account or account without a local password.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let email = normalize_email(email);
        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            debug!("login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let failure = if user.is_active {
            match user.local_password_hash() {
                Some(hash) if verify_password(password, hash)? => None,
                Some(_) => Some("invalid password"),
                None => Some("no local password"),
            }
        } else {
            Some("account inactive")
        };

        if let Some(reason) = failure {
            self.audit
                .record(user.id, AuditAction::Login, false, provenance, Some(reason))
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        user.last_login = Some(self.clock.now());
        let user = self.store.update_user(&user).await?;
        self.audit
            .record(user.id, AuditAction::Login, true, provenance, None)
            .await;
        self.issue_bundle(user, provenance).await
    }

    /// Browser redirect target for the authorization-code flow.
    ///
    /// # Errors
    /// `FederationDisabled` when no identity provider is configured.
    pub fn federated_authorize_url(&self, state: &str) -> Result<String, AuthError> {
        self.federation()?.provider.authorize_url(state)
    }

    /// Federated login by direct submission of a provider ID token.
    ///
    /// # Errors
    /// `FederationDisabled`, `ExternalVerification` for a rejected assertion,
    /// `InvalidCredentials` for an inactive account.
    #[instrument(skip_all)]
    pub async fn federate_id_token(
        &self,
        id_token: &str,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let federation = self.federation()?;
        let assertion = federation.provider.verify_id_token(id_token).await?;
        self.complete_federation(federation, &assertion, provenance).await
    }

    /// Federated login through the authorization-code redirect.
    ///
    /// # Errors
    /// Same as [`Self::federate_id_token`].
    #[instrument(skip_all)]
    pub async fn federate_code(
        &self,
        code: &str,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let federation = self.federation()?;
        let assertion = federation.provider.exchange_code(code).await?;
        self.complete_federation(federation, &assertion, provenance).await
    }

    /// Verify an ID token and return its claims without touching accounts or
    /// sessions.
    ///
    /// # Errors
    /// `FederationDisabled` or `ExternalVerification`.
    pub async fn verify_federated(&self, id_token: &str) -> Result<FederatedAssertion, AuthError> {
        let federation = self.federation()?;
        let assertion = federation.provider.verify_id_token(id_token).await?;
        federation.reconciler.check(&assertion)?;
        Ok(assertion)
    }

    /// Rotate a refresh token into a fresh bundle.
    ///
    /// # Errors
    /// `InvalidRefreshToken` for any unusable token.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let rotated = self.sessions.rotate(refresh_token, provenance).await?;
        self.audit
            .record(rotated.user.id, AuditAction::Refresh, true, provenance, None)
            .await;
        Ok(TokenBundle {
            access_token: rotated.access_token,
            refresh_token: rotated.refresh_token,
            expires_in: self.expires_in(),
            user: rotated.user,
        })
    }

    /// Revoke the session behind `refresh_token`. Unknown or already revoked
    /// tokens succeed silently.
    ///
    /// # Errors
    /// `Store` on persistence failure.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        refresh_token: &str,
        provenance: &RequestProvenance,
    ) -> Result<(), AuthError> {
        if let Some(session) = self.sessions.revoke(refresh_token).await? {
            self.audit
                .record(session.user_id, AuditAction::Logout, true, provenance, None)
                .await;
        }
        Ok(())
    }

    /// Verify a bearer access token.
    ///
    /// # Errors
    /// `InvalidToken` for any malformed, forged or expired token.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.issuer.verify_access_token(access_token, self.clock.now())
    }

    /// Load the account behind verified claims.
    ///
    /// # Errors
    /// `InvalidToken` when the account no longer exists or is inactive.
    pub async fn current_user(&self, claims: &AccessClaims) -> Result<User, AuthError> {
        match self.store.find_user_by_id(claims.uid).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::InvalidToken),
        }
    }

    /// # Errors
    /// Returns the store error when the backend is unreachable.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.store.ping().await
    }

    fn federation(&self) -> Result<&Federation, AuthError> {
        self.federation.as_ref().ok_or(AuthError::FederationDisabled)
    }

    async fn complete_federation(
        &self,
        federation: &Federation,
        assertion: &FederatedAssertion,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let reconciliation = federation.reconciler.reconcile(assertion).await?;
        if let Reconciliation::Provisioned(user) = &reconciliation {
            self.audit
                .record(
                    user.id,
                    AuditAction::Register,
                    true,
                    provenance,
                    Some("google account provisioned"),
                )
                .await;
        }

        let user = reconciliation.into_user();
        self.audit
            .record(user.id, AuditAction::GoogleAuth, true, provenance, None)
            .await;
        self.issue_bundle(user, provenance).await
    }

    async fn issue_bundle(
        &self,
        user: User,
        provenance: &RequestProvenance,
    ) -> Result<TokenBundle, AuthError> {
        let access_token = self.issuer.issue_access_token(
            user.id,
            &user.email,
            &user.roles,
            user.roles.is_admin(),
            self.clock.now(),
        )?;
        let issued = self.sessions.open(user.id, provenance).await?;
        Ok(TokenBundle {
            access_token,
            refresh_token: issued.refresh_token,
            expires_in: self.expires_in(),
            user,
        })
    }

    fn expires_in(&self) -> i64 {
        self.issuer.access_ttl().num_seconds()
    }
}

/// Check a registration and return the normalized email.
fn validate_registration(registration: &Registration) -> Result<String, AuthError> {
    let email = normalize_email(&registration.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }
    if registration.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if registration.password != registration.confirm_password {
        return Err(AuthError::Validation("passwords do not match".to_string()));
    }
    if registration.first_name.trim().is_empty() || registration.last_name.trim().is_empty() {
        return Err(AuthError::Validation(
            "first name and last name are required".to_string(),
        ));
    }
    Ok(email)
}
