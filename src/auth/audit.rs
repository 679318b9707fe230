//! Best-effort, append-only audit trail of authentication events.

use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{AuditAction, NewAuthAudit, RequestProvenance};
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn CredentialStore>,
}

impl AuditRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Append an audit entry. A failed write is logged and otherwise ignored
    /// so it never changes the outcome of the operation being audited.
    pub async fn record(
        &self,
        user_id: i64,
        action: AuditAction,
        success: bool,
        provenance: &RequestProvenance,
        details: Option<&str>,
    ) {
        let entry = NewAuthAudit {
            user_id,
            action,
            success,
            ip_address: provenance.ip_address.clone(),
            user_agent: provenance.user_agent.clone(),
            device_id: provenance.device_id.clone(),
            details: details.map(ToString::to_string),
        };

        match self.store.insert_audit(entry).await {
            Ok(audit) => debug!(audit_id = audit.id, %action, success, "auth audit recorded"),
            Err(err) => warn!(user_id, %action, success, "failed to record auth audit: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{AuthAudit, NewSession, NewUser, Session, SessionGrant, User};
    use crate::store::{CreateUserOutcome, MemoryCredentialStore, Rotation};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct FailingStore;

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn find_user_by_id(&self, _id: i64) -> Result<Option<User>> {
            Err(anyhow!("down"))
        }
        async fn find_user_by_email(&self, _email: &str) -> Result<Option<User>> {
            Err(anyhow!("down"))
        }
        async fn find_user_by_external_sub(&self, _sub: &str) -> Result<Option<User>> {
            Err(anyhow!("down"))
        }
        async fn create_user(&self, _user: NewUser) -> Result<CreateUserOutcome> {
            Err(anyhow!("down"))
        }
        async fn update_user(&self, _user: &User) -> Result<User> {
            Err(anyhow!("down"))
        }
        async fn insert_session(&self, _session: NewSession) -> Result<Session> {
            Err(anyhow!("down"))
        }
        async fn rotate_session(
            &self,
            _token_hash: &[u8],
            _now: DateTime<Utc>,
            _replacement: SessionGrant,
        ) -> Result<Option<Rotation>> {
            Err(anyhow!("down"))
        }
        async fn revoke_session(
            &self,
            _token_hash: &[u8],
            _now: DateTime<Utc>,
        ) -> Result<Option<Session>> {
            Err(anyhow!("down"))
        }
        async fn insert_audit(&self, _audit: NewAuthAudit) -> Result<AuthAudit> {
            Err(anyhow!("down"))
        }
        async fn ping(&self) -> Result<()> {
            Err(anyhow!("down"))
        }
    }

    #[tokio::test]
    async fn record_copies_provenance() {
        let store = Arc::new(MemoryCredentialStore::new());
        let recorder = AuditRecorder::new(store.clone());
        let provenance = RequestProvenance {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8".to_string()),
            device_id: Some("laptop".to_string()),
        };

        recorder
            .record(3, AuditAction::Login, false, &provenance, Some("invalid password"))
            .await;

        let log = store.audit_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user_id, 3);
        assert_eq!(log[0].action, AuditAction::Login);
        assert!(!log[0].success);
        assert_eq!(log[0].ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(log[0].device_id.as_deref(), Some("laptop"));
        assert_eq!(log[0].details.as_deref(), Some("invalid password"));
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let recorder = AuditRecorder::new(Arc::new(FailingStore));
        recorder
            .record(1, AuditAction::Logout, true, &RequestProvenance::default(), None)
            .await;
    }
}
