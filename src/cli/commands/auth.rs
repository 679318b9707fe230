use clap::{Arg, Command};

use crate::auth::config::{MAX_ACCESS_TOKEN_TTL_SECONDS, MAX_REFRESH_TOKEN_TTL_SECONDS};

pub const ARG_SIGNING_SECRET: &str = "signing-secret";
pub const ARG_PREVIOUS_SIGNING_SECRET: &str = "previous-signing-secret";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_ISSUER: &str = "issuer";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_SECRET)
                .long(ARG_SIGNING_SECRET)
                .help("HMAC secret used to sign access tokens (at least 32 bytes)")
                .env("MIS_AUTH_SIGNING_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PREVIOUS_SIGNING_SECRET)
                .long(ARG_PREVIOUS_SIGNING_SECRET)
                .help("Retired signing secret still accepted when verifying access tokens")
                .env("MIS_AUTH_PREVIOUS_SIGNING_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token TTL in seconds (at most one day)")
                .env("MIS_AUTH_ACCESS_TOKEN_TTL")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token (session) TTL in seconds (at most 365 days)")
                .env("MIS_AUTH_REFRESH_TOKEN_TTL")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer claim written into access tokens")
                .env("MIS_AUTH_ISSUER")
                .default_value("mis-auth"),
        )
}
