use crate::{
    api::{self, ApiConfig},
    auth::{AuthConfig, AuthService},
    google::{GoogleClient, GoogleConfig},
    store::PgCredentialStore,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

const SCHEMA_SQL: &str = include_str!("../../../sql/schema.sql");

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub cors_origin: Option<String>,
    pub apply_schema: bool,
    pub auth: AuthConfig,
    pub google: Option<GoogleConfig>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the auth configuration is
/// rejected, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 30))
        .test_before_acquire(true)
        .connect(args.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    if args.apply_schema {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to apply database schema")?;
        info!("Database schema applied");
    }

    let store = Arc::new(PgCredentialStore::new(pool));
    let mut service =
        AuthService::new(&args.auth, store).context("Invalid authentication configuration")?;

    let secure_cookies = args
        .google
        .as_ref()
        .is_some_and(|google| google.redirect_url.starts_with("https://"));

    if let Some(google) = args.google {
        let client = GoogleClient::new(google).context("Failed to build Google client")?;
        service = service.with_identity_provider(Arc::new(client));
    }

    let config = ApiConfig {
        cors_origin: args.cors_origin,
        secure_cookies,
    };

    api::serve(args.port, Arc::new(service), config).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(args.dsn.expose_secret())),
        ("issuer", args.auth.issuer().to_string()),
        (
            "access_token_ttl",
            format!("{}s", args.auth.access_token_ttl_seconds()),
        ),
        (
            "refresh_token_ttl",
            format!("{}s", args.auth.refresh_token_ttl_seconds()),
        ),
        (
            "google_client_id",
            args.google
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |g| g.client_id.clone()),
        ),
        (
            "google_client_secret_set",
            args.google
                .as_ref()
                .is_some_and(|g| g.client_secret.is_some())
                .to_string(),
        ),
        (
            "cors_origin",
            args.cors_origin.clone().unwrap_or_else(|| "*".to_string()),
        ),
        ("apply_schema", args.apply_schema.to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
