//! Credential store seam.
//!
//! The authentication core only talks to persistence through
//! [`CredentialStore`]. `PgCredentialStore` is the production backend;
//! `MemoryCredentialStore` keeps the same semantics in process for tests and
//! local runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::models::{AuthAudit, NewAuthAudit, NewSession, NewUser, Session, SessionGrant, User};

mod memory;
mod postgres;

pub use memory::MemoryCredentialStore;
pub use postgres::PgCredentialStore;

/// A committed rotation: the replacement session and its owner as read
/// inside the same transaction.
#[derive(Debug)]
pub struct Rotation {
    pub session: Session,
    pub user: User,
}

/// Outcome when inserting a user that may collide on email or external subject.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>>;

    /// `email` must already be normalized (trimmed, lowercase).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_external_sub(&self, sub: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome>;

    /// Persist the mutable fields of `user` and return the stored row.
    async fn update_user(&self, user: &User) -> Result<User>;

    async fn insert_session(&self, session: NewSession) -> Result<Session>;

    /// Atomically revoke the session matching `token_hash` (unrevoked,
    /// unexpired at `now`, owner active) and open a replacement for the same
    /// user. Returns `None` when nothing matched; concurrent callers presenting
    /// the same hash see at most one success.
    async fn rotate_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
        replacement: SessionGrant,
    ) -> Result<Option<Rotation>>;

    /// Revoke the unrevoked session matching `token_hash`, if any.
    async fn revoke_session(&self, token_hash: &[u8], now: DateTime<Utc>)
        -> Result<Option<Session>>;

    async fn insert_audit(&self, audit: NewAuthAudit) -> Result<AuthAudit>;

    /// Cheap liveness check for `/health`.
    async fn ping(&self) -> Result<()>;
}
