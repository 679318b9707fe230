//! PostgreSQL credential store (`sql/schema.sql`).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{Instrument, Span};

use super::{CreateUserOutcome, CredentialStore, Rotation};
use crate::auth::models::{
    AuditAction, AuthAudit, NewAuthAudit, NewSession, NewUser, Roles, Session, SessionGrant, User,
};

const USER_COLUMNS: &str = "id, email, password_hash, external_sub, first_name, last_name, \
     has_local_password, is_active, roles, is_admin, last_login, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, token_hash, device_id, user_agent, ip_address, \
     expires_at, revoked_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_where(&self, column: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user")?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn db_span(operation: &str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let roles: Vec<String> = row.try_get("roles")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        external_sub: row.try_get("external_sub")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        has_local_password: row.try_get("has_local_password")?,
        is_active: row.try_get("is_active")?,
        roles: Roles::from_names(&roles),
        is_admin: row.try_get("is_admin")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        device_id: row.try_get("device_id")?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuthAudit> {
    let action: String = row.try_get("action")?;
    Ok(AuthAudit {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        action: action.parse::<AuditAction>().map_err(|err| anyhow!(err))?,
        success: row.try_get("success")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        device_id: row.try_get("device_id")?,
        details: row.try_get("details")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

async fn insert_session_row<'e, E>(executor: E, user_id: i64, grant: &SessionGrant) -> Result<Session>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let query = format!(
        "INSERT INTO user_sessions \
             (user_id, token_hash, device_id, user_agent, ip_address, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {SESSION_COLUMNS}"
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(&grant.token_hash)
        .bind(&grant.device_id)
        .bind(&grant.user_agent)
        .bind(&grant.ip_address)
        .bind(grant.expires_at)
        .fetch_one(executor)
        .instrument(db_span("INSERT", &query))
        .await
        .context("failed to insert session")?;
    session_from_row(&row)
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("lower(email)", email).await
    }

    async fn find_user_by_external_sub(&self, sub: &str) -> Result<Option<User>> {
        self.find_user_where("external_sub", sub).await
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let query = format!(
            "INSERT INTO users \
                 (email, password_hash, external_sub, first_name, last_name, \
                  has_local_password, roles, is_admin, last_login) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {USER_COLUMNS}"
        );
        let result = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.external_sub)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.has_local_password)
            .bind(user.roles.names())
            .bind(user.is_admin())
            .bind(user.last_login)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let query = format!(
            "UPDATE users SET \
                 password_hash = $2, external_sub = $3, first_name = $4, last_name = $5, \
                 has_local_password = $6, is_active = $7, roles = $8, is_admin = $9, \
                 last_login = $10, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(user.id)
            .bind(&user.password_hash)
            .bind(&user.external_sub)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.has_local_password)
            .bind(user.is_active)
            .bind(user.roles.names())
            .bind(user.is_admin)
            .bind(user.last_login)
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update user")?;
        user_from_row(&row)
    }

    async fn insert_session(&self, session: NewSession) -> Result<Session> {
        insert_session_row(&self.pool, session.user_id, &session.grant).await
    }

    async fn rotate_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
        replacement: SessionGrant,
    ) -> Result<Option<Rotation>> {
        // Revoke and replace in one transaction. The conditional UPDATE takes
        // the row lock, so a concurrent rotation of the same token re-checks
        // `revoked_at IS NULL` after we commit and matches nothing.
        let mut tx = self.pool.begin().await.context("begin rotation transaction")?;

        let query = r"
            UPDATE user_sessions AS s
            SET revoked_at = $2, updated_at = $2
            FROM users AS u
            WHERE s.user_id = u.id
              AND u.is_active
              AND s.token_hash = $1
              AND s.revoked_at IS NULL
              AND s.expires_at > $2
            RETURNING s.user_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke session for rotation")?;

        // Dropping `tx` on any early return rolls the revocation back.
        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: i64 = row.try_get("user_id")?;

        let user_query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user_row = sqlx::query(&user_query)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", &user_query))
            .await
            .context("failed to load session owner")?;
        let user = user_from_row(&user_row)?;

        let session = insert_session_row(&mut *tx, user_id, &replacement).await?;

        tx.commit().await.context("commit rotation transaction")?;

        Ok(Some(Rotation { session, user }))
    }

    async fn revoke_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = format!(
            "UPDATE user_sessions \
             SET revoked_at = $2, updated_at = $2 \
             WHERE token_hash = $1 AND revoked_at IS NULL \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to revoke session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn insert_audit(&self, audit: NewAuthAudit) -> Result<AuthAudit> {
        let query = r"
            INSERT INTO auth_audit
                (user_id, action, success, ip_address, user_agent, device_id, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, action, success, ip_address, user_agent, device_id,
                      details, created_at
        ";
        let row = sqlx::query(query)
            .bind(audit.user_id)
            .bind(audit.action.as_str())
            .bind(audit.success)
            .bind(&audit.ip_address)
            .bind(&audit.user_agent)
            .bind(&audit.device_id)
            .bind(&audit.details)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert auth audit")?;
        audit_from_row(&row)
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span =
            tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn column_lists_cover_every_field() {
        for column in ["external_sub", "has_local_password", "roles", "is_admin", "last_login"] {
            assert!(USER_COLUMNS.contains(column), "missing {column}");
        }
        for column in ["token_hash", "device_id", "revoked_at", "expires_at"] {
            assert!(SESSION_COLUMNS.contains(column), "missing {column}");
        }
    }
}
