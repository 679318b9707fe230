//! API handlers for mis-auth.

pub mod auth;
pub mod health;
pub mod me;
