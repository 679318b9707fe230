//! Authentication and session-lifecycle core.
//!
//! Flow summary:
//! - Password and federated credentials are checked by [`AuthService`].
//! - [`TokenIssuer`] mints HS256 access tokens and opaque refresh tokens.
//! - [`SessionManager`] stores refresh-token hashes and rotates them on use.
//! - [`Reconciler`] maps identity-provider assertions onto local users.
//! - [`AuditRecorder`] appends one entry per authentication event.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod password;
pub mod reconciler;
pub mod service;
pub mod session;
pub mod token;
pub mod utils;

pub use audit::AuditRecorder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::AuthError;
pub use models::{AuditAction, RequestProvenance, Role, Roles, User};
pub use reconciler::{FederatedAssertion, IdentityProvider, Reconciler, Reconciliation};
pub use service::{AuthService, RegisterOutcome, Registration, TokenBundle};
pub use session::SessionManager;
pub use token::{AccessClaims, TokenIssuer};
