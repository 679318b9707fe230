use clap::{Arg, Command};

pub const ARG_CLIENT_ID: &str = "google-client-id";
pub const ARG_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_REDIRECT_URL: &str = "google-redirect-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("Google OAuth client id; federated login is disabled when unset")
                .env("MIS_AUTH_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("Google OAuth client secret, required for the authorization-code flow")
                .env("MIS_AUTH_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true)
                .requires(ARG_CLIENT_ID),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URL)
                .long(ARG_REDIRECT_URL)
                .help("Redirect URL registered for the authorization-code flow")
                .env("MIS_AUTH_GOOGLE_REDIRECT_URL")
                .default_value(crate::google::DEFAULT_REDIRECT_URL),
        )
}
