use crate::auth::AuthConfig;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, auth, google};
use crate::google::GoogleConfig;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Turn parsed arguments into the action to execute.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let cors_origin = matches
        .get_one::<String>(commands::ARG_CORS_ORIGIN)
        .cloned()
        .filter(|origin| !origin.trim().is_empty());
    let apply_schema = matches.get_flag(commands::ARG_APPLY_SCHEMA);

    let auth = auth_config(matches)?;
    let google = google_config(matches);

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        cors_origin,
        apply_schema,
        auth,
        google,
    }))
}

fn auth_config(matches: &clap::ArgMatches) -> Result<AuthConfig> {
    let secret = matches
        .get_one::<String>(auth::ARG_SIGNING_SECRET)
        .cloned()
        .context("missing required argument: --signing-secret")?;

    let mut config = AuthConfig::new(SecretString::from(secret));

    if let Some(ttl) = matches.get_one::<i64>(auth::ARG_ACCESS_TOKEN_TTL) {
        config = config.with_access_token_ttl_seconds(*ttl);
    }
    if let Some(ttl) = matches.get_one::<i64>(auth::ARG_REFRESH_TOKEN_TTL) {
        config = config.with_refresh_token_ttl_seconds(*ttl);
    }
    if let Some(issuer) = matches.get_one::<String>(auth::ARG_ISSUER) {
        config = config.with_issuer(issuer.clone());
    }
    if let Some(previous) = matches.get_one::<String>(auth::ARG_PREVIOUS_SIGNING_SECRET) {
        config = config.with_previous_signing_secret(SecretString::from(previous.clone()));
    }

    let client_id = matches.get_one::<String>(google::ARG_CLIENT_ID).cloned();
    Ok(config.with_google_client_id(client_id))
}

fn google_config(matches: &clap::ArgMatches) -> Option<GoogleConfig> {
    let client_id = matches
        .get_one::<String>(google::ARG_CLIENT_ID)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())?;

    let client_secret = matches
        .get_one::<String>(google::ARG_CLIENT_SECRET)
        .filter(|secret| !secret.is_empty())
        .map(|secret| SecretString::from(secret.clone()));

    let redirect_url = matches
        .get_one::<String>(google::ARG_REDIRECT_URL)
        .cloned()
        .unwrap_or_else(|| crate::google::DEFAULT_REDIRECT_URL.to_string());

    Some(GoogleConfig::new(client_id, client_secret, redirect_url))
}
