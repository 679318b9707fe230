use serde::Deserialize;

use crate::auth::{AuthError, FederatedAssertion};

/// `email_verified` arrives as a JSON bool from some endpoints and as the
/// string "true"/"false" from tokeninfo.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_true(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

/// Claims returned by Google for a verified ID token. Every field is optional
/// at the wire level; [`GoogleClaims::into_assertion`] enforces what is required.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct GoogleClaims {
    pub sub: Option<String>,
    pub aud: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    email_verified: Option<Flag>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

impl GoogleClaims {
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified.as_ref().is_some_and(Flag::is_true)
    }

    /// # Errors
    /// Returns `AuthError::ExternalVerification` when `sub`, `aud` or `email`
    /// is missing or blank.
    pub fn into_assertion(self) -> Result<FederatedAssertion, AuthError> {
        let email_verified = self.email_verified();
        Ok(FederatedAssertion {
            subject: required(self.sub, "sub")?,
            audience: required(self.aud, "aud")?,
            email: required(self.email, "email")?,
            email_verified,
            given_name: optional(self.given_name),
            family_name: optional(self.family_name),
            name: optional(self.name),
            picture: optional(self.picture),
        })
    }
}

fn required(value: Option<String>, claim: &str) -> Result<String, AuthError> {
    optional(value).ok_or_else(|| AuthError::ExternalVerification(format!("missing {claim} claim")))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
