//! Federated identity reconciliation.
//!
//! Maps a verified identity-provider assertion onto a local user: find by
//! subject, then by email, otherwise provision. Merging only fills blanks and
//! never disables an existing local password.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::clock::Clock;
use super::error::AuthError;
use super::models::{NewUser, Roles, User};
use super::utils::{normalize_email, split_display_name};
use crate::store::{CreateUserOutcome, CredentialStore};

/// Claims asserted by the identity provider, already extracted into typed
/// fields. Optional profile fields are `None` when absent or blank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederatedAssertion {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub audience: String,
}

/// Verifies external credentials and turns them into assertions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is redirected to for the authorization-code flow.
    ///
    /// # Errors
    /// Returns `AuthError::ExternalVerification` when the URL cannot be built.
    fn authorize_url(&self, state: &str) -> Result<String, AuthError>;

    /// Verify an ID token issued by the provider.
    async fn verify_id_token(&self, id_token: &str) -> Result<FederatedAssertion, AuthError>;

    /// Exchange an authorization code and verify the resulting identity.
    async fn exchange_code(&self, code: &str) -> Result<FederatedAssertion, AuthError>;
}

#[derive(Debug)]
pub enum Reconciliation {
    /// No matching account existed; a new one was created.
    Provisioned(User),
    /// An existing account matched by subject or email.
    Merged(User),
}

impl Reconciliation {
    #[must_use]
    pub fn user(&self) -> &User {
        match self {
            Self::Provisioned(user) | Self::Merged(user) => user,
        }
    }

    #[must_use]
    pub fn into_user(self) -> User {
        match self {
            Self::Provisioned(user) | Self::Merged(user) => user,
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    client_id: String,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, client_id: String) -> Self {
        Self {
            store,
            clock,
            client_id,
        }
    }

    /// Re-check an assertion before trusting any of its claims.
    ///
    /// # Errors
    /// Returns `AuthError::ExternalVerification` when the audience is not this
    /// service's client id, a required claim is missing, or the email is not
    /// verified by the provider.
    pub fn check(&self, assertion: &FederatedAssertion) -> Result<(), AuthError> {
        if assertion.audience != self.client_id {
            return Err(AuthError::ExternalVerification(
                "token audience does not match client id".to_string(),
            ));
        }
        if assertion.subject.trim().is_empty() {
            return Err(AuthError::ExternalVerification("missing sub claim".to_string()));
        }
        if assertion.email.trim().is_empty() {
            return Err(AuthError::ExternalVerification("missing email claim".to_string()));
        }
        if !assertion.email_verified {
            return Err(AuthError::ExternalVerification("email not verified".to_string()));
        }
        Ok(())
    }

    /// Find or create the local user for `assertion`.
    ///
    /// # Errors
    /// Returns `AuthError::ExternalVerification` when [`Self::check`] fails,
    /// `AuthError::InvalidCredentials` for an inactive account, and
    /// `AuthError::Store` on persistence failure.
    #[instrument(skip_all, fields(sub = %assertion.subject))]
    pub async fn reconcile(&self, assertion: &FederatedAssertion) -> Result<Reconciliation, AuthError> {
        self.check(assertion)?;
        let email = normalize_email(&assertion.email);

        if let Some(user) = self.lookup(&assertion.subject, &email).await? {
            return self.merge(user, assertion).await.map(Reconciliation::Merged);
        }

        let (first_name, last_name) = provisioned_names(assertion);
        let draft = NewUser {
            email: email.clone(),
            password_hash: None,
            external_sub: Some(assertion.subject.clone()),
            first_name,
            last_name,
            has_local_password: false,
            roles: Roles::default(),
            last_login: Some(self.clock.now()),
        };

        match self.store.create_user(draft).await? {
            CreateUserOutcome::Created(user) => {
                info!(user_id = user.id, "provisioned federated user");
                Ok(Reconciliation::Provisioned(user))
            }
            CreateUserOutcome::Conflict => {
                // Lost a race with a concurrent provision or registration.
                debug!("provision conflicted, merging into existing user");
                match self.lookup(&assertion.subject, &email).await? {
                    Some(user) => self.merge(user, assertion).await.map(Reconciliation::Merged),
                    None => Err(AuthError::Conflict),
                }
            }
        }
    }

    async fn lookup(&self, subject: &str, email: &str) -> Result<Option<User>, AuthError> {
        if let Some(user) = self.store.find_user_by_external_sub(subject).await? {
            return Ok(Some(user));
        }
        Ok(self.store.find_user_by_email(email).await?)
    }

    async fn merge(&self, mut user: User, assertion: &FederatedAssertion) -> Result<User, AuthError> {
        if !user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        user.external_sub = Some(assertion.subject.clone());
        user.last_login = Some(self.clock.now());
        if user.first_name.trim().is_empty() {
            if let Some(given) = non_blank(assertion.given_name.as_deref()) {
                user.first_name = given.to_string();
            }
        }
        if user.last_name.trim().is_empty() {
            if let Some(family) = non_blank(assertion.family_name.as_deref()) {
                user.last_name = family.to_string();
            }
        }

        let user = self.store.update_user(&user).await?;
        debug!(user_id = user.id, "merged federated identity");
        Ok(user)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Explicit given/family names win; the display name fills whichever is missing.
fn provisioned_names(assertion: &FederatedAssertion) -> (String, String) {
    let (split_first, split_last) =
        split_display_name(assertion.name.as_deref().unwrap_or_default());
    let first = non_blank(assertion.given_name.as_deref())
        .map_or(split_first, ToString::to_string);
    let last = non_blank(assertion.family_name.as_deref())
        .map_or(split_last, ToString::to_string);
    (first, last)
}
