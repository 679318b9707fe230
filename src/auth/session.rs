//! Session lifecycle: open, rotate-on-use and revoke.
//!
//! A session is `ACTIVE` until its `revoked_at` is set, after which it is
//! terminal. Refresh tokens are single use: rotation revokes the presented
//! session and opens a replacement inside one store call, so concurrent
//! callers racing on the same token see at most one success.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::clock::Clock;
use super::error::AuthError;
use super::models::{NewSession, RequestProvenance, Session, SessionGrant, User};
use super::token::{hash_refresh_token, TokenIssuer};
use crate::store::{CredentialStore, Rotation};

/// A freshly opened session and the refresh token that unlocks it.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub refresh_token: String,
}

/// Result of a successful rotation.
#[derive(Debug)]
pub struct RotatedSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        issuer: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            clock,
            refresh_ttl,
        }
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Persist a new active session for an already issued refresh-token hash.
    /// Sessions are never deduplicated by device.
    ///
    /// # Errors
    /// Returns `AuthError::Signing` when the expiry is not representable, or
    /// `AuthError::Store` when the session cannot be written.
    pub async fn create_session(
        &self,
        user_id: i64,
        token_hash: Vec<u8>,
        provenance: &RequestProvenance,
    ) -> Result<Session, AuthError> {
        let grant = self.grant(token_hash, provenance)?;
        let session = self
            .store
            .insert_session(NewSession { user_id, grant })
            .await?;
        debug!(session_id = session.id, user_id, "session created");
        Ok(session)
    }

    /// Issue a refresh token and open a session for it.
    ///
    /// # Errors
    /// Returns `AuthError::Hashing` if no randomness is available, or
    /// `AuthError::Store` on persistence failure.
    pub async fn open(
        &self,
        user_id: i64,
        provenance: &RequestProvenance,
    ) -> Result<IssuedSession, AuthError> {
        let refresh = self.issuer.issue_refresh_token()?;
        let session = self
            .create_session(user_id, refresh.hash, provenance)
            .await?;
        Ok(IssuedSession {
            session,
            refresh_token: refresh.plaintext,
        })
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// # Errors
    /// Returns `AuthError::InvalidRefreshToken` when the token is unknown,
    /// expired, already used or revoked, or its owner is inactive. These cases
    /// are not distinguished. Replacement tokens and expiries are prepared
    /// before the store is touched, so any other error leaves the presented
    /// session usable.
    #[instrument(skip_all)]
    pub async fn rotate(
        &self,
        presented: &str,
        provenance: &RequestProvenance,
    ) -> Result<RotatedSession, AuthError> {
        let presented_hash = hash_refresh_token(presented);
        let replacement = self.issuer.issue_refresh_token()?;
        let now = self.clock.now();
        let grant = self.grant(replacement.hash, provenance)?;
        self.issuer.access_expiry(now)?;

        let Some(Rotation { session, user }) = self
            .store
            .rotate_session(&presented_hash, now, grant)
            .await?
        else {
            debug!("refresh token rejected");
            return Err(AuthError::InvalidRefreshToken);
        };

        let access_token = self.issuer.issue_access_token(
            user.id,
            &user.email,
            &user.roles,
            user.roles.is_admin(),
            now,
        )?;

        debug!(session_id = session.id, user_id = user.id, "session rotated");
        Ok(RotatedSession {
            user,
            access_token,
            refresh_token: replacement.plaintext,
            session,
        })
    }

    /// Revoke the session behind a refresh token. Returns the revoked session
    /// when one was active; an unknown or already revoked token is not an error.
    ///
    /// # Errors
    /// Returns `AuthError::Store` on persistence failure.
    pub async fn revoke(&self, presented: &str) -> Result<Option<Session>, AuthError> {
        let hash = hash_refresh_token(presented);
        let revoked = self.store.revoke_session(&hash, self.clock.now()).await?;
        if let Some(session) = &revoked {
            debug!(session_id = session.id, "session revoked");
        }
        Ok(revoked)
    }

    fn grant(
        &self,
        token_hash: Vec<u8>,
        provenance: &RequestProvenance,
    ) -> Result<SessionGrant, AuthError> {
        let device_id = provenance
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.refresh_ttl)
            .ok_or(AuthError::Signing)?;

        Ok(SessionGrant {
            token_hash,
            device_id,
            user_agent: provenance.user_agent.clone(),
            ip_address: provenance.ip_address.clone(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::models::{NewUser, Roles};
    use crate::store::{CreateUserOutcome, MemoryCredentialStore};
    use anyhow::{anyhow, bail, Result};
    use chrono::Utc;
    use secrecy::SecretString;

    struct Fixture {
        store: Arc<MemoryCredentialStore>,
        clock: Arc<ManualClock>,
        manager: SessionManager,
        user: User,
    }

    async fn fixture() -> Result<Fixture> {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let issuer = Arc::new(TokenIssuer::new(
            SecretString::from("k".repeat(32)),
            "mis-auth",
            Duration::minutes(15),
        )?);
        let manager = SessionManager::new(store.clone(), issuer, clock.clone(), Duration::days(1));

        let outcome = store
            .create_user(NewUser {
                email: "a@x.com".to_string(),
                password_hash: None,
                external_sub: None,
                first_name: "A".to_string(),
                last_name: "X".to_string(),
                has_local_password: false,
                roles: Roles::default(),
                last_login: None,
            })
            .await?;
        let CreateUserOutcome::Created(user) = outcome else {
            bail!("user was not created");
        };

        Ok(Fixture {
            store,
            clock,
            manager,
            user,
        })
    }

    #[tokio::test]
    async fn open_generates_device_id_when_absent() -> Result<()> {
        let fx = fixture().await?;
        let issued = fx.manager.open(fx.user.id, &RequestProvenance::default()).await?;

        assert!(Uuid::parse_str(&issued.session.device_id).is_ok());
        assert_eq!(issued.session.token_hash, hash_refresh_token(&issued.refresh_token));
        assert_eq!(issued.session.expires_at, fx.clock.now() + Duration::days(1));
        Ok(())
    }

    #[tokio::test]
    async fn open_keeps_supplied_device_id() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance {
            device_id: Some("tablet-7".to_string()),
            ..RequestProvenance::default()
        };
        let issued = fx.manager.open(fx.user.id, &provenance).await?;
        assert_eq!(issued.session.device_id, "tablet-7");
        Ok(())
    }

    #[tokio::test]
    async fn multiple_sessions_per_user_are_allowed() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance {
            device_id: Some("same".to_string()),
            ..RequestProvenance::default()
        };
        let first = fx.manager.open(fx.user.id, &provenance).await?;
        let second = fx.manager.open(fx.user.id, &provenance).await?;
        assert_ne!(first.session.id, second.session.id);
        assert_eq!(fx.store.sessions().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn rotation_is_single_use() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance::default();
        let issued = fx.manager.open(fx.user.id, &provenance).await?;

        let rotated = fx.manager.rotate(&issued.refresh_token, &provenance).await?;
        assert_ne!(rotated.refresh_token, issued.refresh_token);
        assert_eq!(rotated.user.id, fx.user.id);

        let replay = fx.manager.rotate(&issued.refresh_token, &provenance).await;
        assert!(matches!(replay, Err(AuthError::InvalidRefreshToken)));

        // The replacement still works.
        fx.manager.rotate(&rotated.refresh_token, &provenance).await?;
        Ok(())
    }

    #[tokio::test]
    async fn rotation_rejects_expired_session() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance::default();
        let issued = fx.manager.open(fx.user.id, &provenance).await?;

        fx.clock.advance(Duration::days(1));
        let result = fx.manager.rotate(&issued.refresh_token, &provenance).await;
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_rejects_unknown_token() -> Result<()> {
        let fx = fixture().await?;
        let result = fx
            .manager
            .rotate("not-a-token", &RequestProvenance::default())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_rejects_inactive_owner() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance::default();
        let issued = fx.manager.open(fx.user.id, &provenance).await?;

        let mut user = fx.user.clone();
        user.is_active = false;
        fx.store.update_user(&user).await?;

        let result = fx.manager.rotate(&issued.refresh_token, &provenance).await;
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotation_has_one_winner() -> Result<()> {
        let fx = fixture().await?;
        let issued = fx.manager.open(fx.user.id, &RequestProvenance::default()).await?;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let manager = fx.manager.clone();
            let token = issued.refresh_token.clone();
            handles.push(tokio::spawn(async move {
                manager.rotate(&token, &RequestProvenance::default()).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await? {
                Ok(_) => winners += 1,
                Err(AuthError::InvalidRefreshToken) => {}
                Err(err) => bail!("unexpected rotation error: {err}"),
            }
        }
        assert_eq!(winners, 1);

        let sessions = fx.store.sessions().await;
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s.revoked_at.is_none()).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_rotation_keeps_presented_session() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance::default();
        let issued = fx.manager.open(fx.user.id, &provenance).await?;

        let ttl =
            Duration::try_milliseconds(i64::MAX).ok_or_else(|| anyhow!("ttl out of range"))?;
        let overflowing = Arc::new(TokenIssuer::new(
            SecretString::from("k".repeat(32)),
            "mis-auth",
            ttl,
        )?);
        let broken = SessionManager::new(
            fx.store.clone(),
            overflowing,
            fx.clock.clone(),
            Duration::days(1),
        );

        let result = broken.rotate(&issued.refresh_token, &provenance).await;
        assert!(matches!(result, Err(AuthError::Signing)));

        let sessions = fx.store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].revoked_at.is_none());

        // The untouched token still rotates.
        fx.manager.rotate(&issued.refresh_token, &provenance).await?;
        Ok(())
    }

    #[tokio::test]
    async fn unrepresentable_session_expiry_is_rejected() -> Result<()> {
        let fx = fixture().await?;
        let ttl =
            Duration::try_milliseconds(i64::MAX).ok_or_else(|| anyhow!("ttl out of range"))?;
        let issuer = Arc::new(TokenIssuer::new(
            SecretString::from("k".repeat(32)),
            "mis-auth",
            Duration::minutes(15),
        )?);
        let manager = SessionManager::new(fx.store.clone(), issuer, fx.clock.clone(), ttl);

        let result = manager.open(fx.user.id, &RequestProvenance::default()).await;
        assert!(matches!(result, Err(AuthError::Signing)));
        assert!(fx.store.sessions().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<()> {
        let fx = fixture().await?;
        let provenance = RequestProvenance::default();
        let issued = fx.manager.open(fx.user.id, &provenance).await?;

        let first = fx.manager.revoke(&issued.refresh_token).await?;
        assert!(first.is_some_and(|session| session.revoked_at.is_some()));
        assert!(fx.manager.revoke(&issued.refresh_token).await?.is_none());
        assert!(fx.manager.revoke("never-issued").await?.is_none());

        let refresh = fx.manager.rotate(&issued.refresh_token, &provenance).await;
        assert!(matches!(refresh, Err(AuthError::InvalidRefreshToken)));
        Ok(())
    }
}
