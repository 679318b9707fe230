//! Records persisted by the credential store.
//!
//! `User`, `Session` and `AuthAudit` mirror the `users`, `user_sessions` and
//! `auth_audit` tables. The `New*` drafts carry only what a caller supplies;
//! ids and bookkeeping timestamps are assigned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Inspector,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Inspector => "inspector",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "inspector" => Ok(Self::Inspector),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Non-empty set of roles. An empty input collapses to `{user}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(BTreeSet<Role>);

impl Roles {
    #[must_use]
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let set: BTreeSet<Role> = roles.into_iter().collect();
        if set.is_empty() {
            Self::default()
        } else {
            Self(set)
        }
    }

    /// Parse stored role names, dropping names this build does not know.
    #[must_use]
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().filter_map(|name| name.as_ref().parse().ok()))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|role| role.as_str().to_string()).collect()
    }

    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Admin status is derived from role membership.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl Default for Roles {
    fn default() -> Self {
        Self(BTreeSet::from([Role::User]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: Option<String>,
    pub external_sub: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub has_local_password: bool,
    pub is_active: bool,
    pub roles: Roles,
    pub is_admin: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Local password login is possible only with both the flag and a stored hash.
    #[must_use]
    pub fn local_password_hash(&self) -> Option<&str> {
        if self.has_local_password {
            self.password_hash.as_deref().filter(|hash| !hash.is_empty())
        } else {
            None
        }
    }

    /// Replace the role set and keep the legacy admin flag in step with it.
    pub fn set_roles(&mut self, roles: Roles) {
        self.is_admin = roles.is_admin();
        self.roles = roles;
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub external_sub: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub has_local_password: bool,
    pub roles: Roles,
    pub last_login: Option<DateTime<Utc>>,
}

impl NewUser {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.is_admin()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: Vec<u8>,
    pub device_id: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Usable for refresh only while unrevoked and unexpired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// Everything needed to open a session except the owner.
#[derive(Clone, Debug)]
pub struct SessionGrant {
    pub token_hash: Vec<u8>,
    pub device_id: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: i64,
    pub grant: SessionGrant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    Refresh,
    PasswordReset,
    Register,
    GoogleAuth,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
            Self::PasswordReset => "password_reset",
            Self::Register => "register",
            Self::GoogleAuth => "google_auth",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "refresh" => Ok(Self::Refresh),
            "password_reset" => Ok(Self::PasswordReset),
            "register" => Ok(Self::Register),
            "google_auth" => Ok(Self::GoogleAuth),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthAudit {
    pub id: i64,
    pub user_id: i64,
    pub action: AuditAction,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAuthAudit {
    pub user_id: i64,
    pub action: AuditAction,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub details: Option<String>,
}

/// Where a request came from. Recorded, never enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestProvenance {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}
