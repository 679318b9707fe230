//! # mis-auth
//!
//! Authentication and session service for the MIS platform.
//!
//! Users authenticate with an email and password or through Google. A
//! successful login yields a short-lived signed **access token** (HS256 JWT)
//! and a long-lived opaque **refresh token**. Refresh tokens are single-use:
//! every refresh rotates the session's token, and only a SHA-256 digest of
//! the current token is ever persisted.
//!
//! ## Layout
//!
//! - [`auth`]: the core flows (register, login, federation, refresh, logout)
//!   behind [`auth::AuthService`].
//! - [`store`]: the [`store::CredentialStore`] seam with `PostgreSQL` and
//!   in-memory implementations.
//! - [`google`]: ID-token verification and authorization-code exchange.
//! - [`api`]: the axum router, handlers and `OpenAPI` document.
//! - [`cli`]: argument parsing, telemetry and the server action.
//!
//! Every security-relevant event (register, login, google auth, refresh,
//! logout) is appended to the `auth_audit` table. See `sql/schema.sql`.

pub mod api;
pub mod auth;
pub mod cli;
pub mod google;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
