use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CreateUserOutcome, CredentialStore, Rotation};
use crate::auth::models::{AuthAudit, NewAuthAudit, NewSession, NewUser, Session, SessionGrant, User};

#[derive(Default)]
struct State {
    users: Vec<User>,
    sessions: Vec<Session>,
    audits: Vec<AuthAudit>,
    next_user_id: i64,
    next_session_id: i64,
    next_audit_id: i64,
}

impl State {
    fn open_session(&mut self, user_id: i64, grant: SessionGrant) -> Session {
        self.next_session_id += 1;
        let now = Utc::now();
        let session = Session {
            id: self.next_session_id,
            user_id,
            token_hash: grant.token_hash,
            device_id: grant.device_id,
            user_agent: grant.user_agent,
            ip_address: grant.ip_address,
            expires_at: grant.expires_at,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.sessions.push(session.clone());
        session
    }
}

/// In-process store. A single lock serializes every operation, which gives
/// rotation the same one-winner guarantee as the conditional SQL update.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<State>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every session ever opened, revoked ones included.
    pub async fn sessions(&self) -> Vec<Session> {
        self.state.lock().await.sessions.clone()
    }

    /// Snapshot of the audit log in insertion order.
    pub async fn audit_log(&self) -> Vec<AuthAudit> {
        self.state.lock().await.audits.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_external_sub(&self, sub: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|user| user.external_sub.as_deref() == Some(sub))
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserOutcome> {
        let mut state = self.state.lock().await;
        let taken = state.users.iter().any(|user| {
            user.email.eq_ignore_ascii_case(&new_user.email)
                || (new_user.external_sub.is_some() && user.external_sub == new_user.external_sub)
        });
        if taken {
            return Ok(CreateUserOutcome::Conflict);
        }

        state.next_user_id += 1;
        let now = Utc::now();
        let is_admin = new_user.is_admin();
        let user = User {
            id: state.next_user_id,
            email: new_user.email,
            password_hash: new_user.password_hash,
            external_sub: new_user.external_sub,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            has_local_password: new_user.has_local_password,
            is_active: true,
            roles: new_user.roles,
            is_admin,
            last_login: new_user.last_login,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let mut state = self.state.lock().await;
        if let Some(sub) = user.external_sub.as_deref() {
            let claimed = state
                .users
                .iter()
                .any(|other| other.id != user.id && other.external_sub.as_deref() == Some(sub));
            if claimed {
                return Err(anyhow!("external subject already linked to another user"));
            }
        }

        let stored = state
            .users
            .iter_mut()
            .find(|stored| stored.id == user.id)
            .ok_or_else(|| anyhow!("user {} not found", user.id))?;
        stored.password_hash = user.password_hash.clone();
        stored.external_sub = user.external_sub.clone();
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        stored.has_local_password = user.has_local_password;
        stored.is_active = user.is_active;
        stored.roles = user.roles.clone();
        stored.is_admin = user.is_admin;
        stored.last_login = user.last_login;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session> {
        let mut state = self.state.lock().await;
        Ok(state.open_session(session.user_id, session.grant))
    }

    async fn rotate_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
        replacement: SessionGrant,
    ) -> Result<Option<Rotation>> {
        let mut state = self.state.lock().await;
        let Some(index) = state
            .sessions
            .iter()
            .position(|session| session.token_hash == token_hash && session.is_active(now))
        else {
            return Ok(None);
        };

        let user_id = state.sessions[index].user_id;
        let Some(user) = state
            .users
            .iter()
            .find(|user| user.id == user_id && user.is_active)
            .cloned()
        else {
            return Ok(None);
        };

        let revoked = &mut state.sessions[index];
        revoked.revoked_at = Some(now);
        revoked.updated_at = now;

        let session = state.open_session(user_id, replacement);
        Ok(Some(Rotation { session, user }))
    }

    async fn revoke_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        let revoked = state
            .sessions
            .iter_mut()
            .find(|session| session.token_hash == token_hash && session.revoked_at.is_none())
            .map(|session| {
                session.revoked_at = Some(now);
                session.updated_at = now;
                session.clone()
            });
        Ok(revoked)
    }

    async fn insert_audit(&self, audit: NewAuthAudit) -> Result<AuthAudit> {
        let mut state = self.state.lock().await;
        state.next_audit_id += 1;
        let entry = AuthAudit {
            id: state.next_audit_id,
            user_id: audit.user_id,
            action: audit.action,
            success: audit.success,
            ip_address: audit.ip_address,
            user_agent: audit.user_agent,
            device_id: audit.device_id,
            details: audit.details,
            created_at: Utc::now(),
        };
        state.audits.push(entry.clone());
        Ok(entry)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
