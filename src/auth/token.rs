//! Access and refresh token issuance.
//!
//! Access tokens are HS256 JWTs: stateless, verified by signature and expiry
//! alone. Refresh tokens are 256-bit random values handed to the client once;
//! only their SHA-256 digest is persisted.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use super::error::AuthError;
use super::models::Roles;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_SECRET_BYTES: usize = 32;
const REFRESH_TOKEN_BYTES: usize = 32;
const ALG: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: String,
    pub uid: i64,
    pub email: String,
    pub roles: Vec<String>,
    pub admin: bool,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    #[must_use]
    pub fn roles(&self) -> Roles {
        Roles::from_names(&self.roles)
    }
}

/// Plaintext refresh token plus the digest that gets stored.
pub struct IssuedRefreshToken {
    pub plaintext: String,
    pub hash: Vec<u8>,
}

impl fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("plaintext", &"[REDACTED]")
            .field("hash_len", &self.hash.len())
            .finish()
    }
}

/// Signs and verifies access tokens with a process-wide secret.
///
/// Additional verification-only secrets can be registered to honour tokens
/// signed before a secret rotation.
pub struct TokenIssuer {
    secret: SecretString,
    previous: Vec<SecretString>,
    issuer: String,
    access_ttl: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("previous_secrets", &self.previous.len())
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// # Errors
    /// Returns `AuthError::Validation` when the secret is shorter than 32 bytes.
    pub fn new(
        secret: SecretString,
        issuer: impl Into<String>,
        access_ttl: Duration,
    ) -> Result<Self, AuthError> {
        check_secret(&secret)?;
        Ok(Self {
            secret,
            previous: Vec::new(),
            issuer: issuer.into(),
            access_ttl,
        })
    }

    /// # Errors
    /// Returns `AuthError::Validation` when the secret is shorter than 32 bytes.
    pub fn with_previous_secret(mut self, secret: SecretString) -> Result<Self, AuthError> {
        check_secret(&secret)?;
        self.previous.push(secret);
        Ok(self)
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expiry of an access token minted at `now`.
    ///
    /// # Errors
    /// Returns `AuthError::Signing` when the expiry is not a representable instant.
    pub fn access_expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        now.checked_add_signed(self.access_ttl).ok_or(AuthError::Signing)
    }

    /// Mint a signed access token for the given identity.
    ///
    /// # Errors
    /// Returns `AuthError::Signing` when the token cannot be encoded or signed.
    pub fn issue_access_token(
        &self,
        user_id: i64,
        email: &str,
        roles: &Roles,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = AccessClaims {
            sub: user_id.to_string(),
            uid: user_id,
            email: email.to_string(),
            roles: roles.names(),
            admin: is_admin,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: self.access_expiry(now)?.timestamp(),
        };
        let header = TokenHeader {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };

        let header_b64 = b64e_json(&header)?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = mac_for(&self.secret).ok_or(AuthError::Signing)?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Check signature, issuer and expiry, returning the decoded claims.
    ///
    /// # Errors
    /// Every failure is reported as `AuthError::InvalidToken`.
    pub fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, AuthError> {
        self.decode(token, now).map_err(|reason| {
            debug!("access token rejected: {reason}");
            AuthError::InvalidToken
        })
    }

    fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, &'static str> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or("format")?;
        let claims_b64 = parts.next().ok_or("format")?;
        let signature_b64 = parts.next().ok_or("format")?;
        if parts.next().is_some() {
            return Err("format");
        }

        let header: TokenHeader = b64d_json(header_b64).ok_or("header")?;
        if header.alg != ALG {
            return Err("algorithm");
        }

        let signature = Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| "signature")?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let verified = std::iter::once(&self.secret)
            .chain(self.previous.iter())
            .filter_map(mac_for)
            .any(|mut mac| {
                mac.update(signing_input.as_bytes());
                mac.verify_slice(&signature).is_ok()
            });
        if !verified {
            return Err("signature");
        }

        let claims: AccessClaims = b64d_json(claims_b64).ok_or("claims")?;
        if claims.iss != self.issuer {
            return Err("issuer");
        }
        if claims.exp <= now.timestamp() {
            return Err("expired");
        }

        Ok(claims)
    }

    /// Generate a refresh token and its storage digest.
    ///
    /// # Errors
    /// Returns `AuthError::Hashing` when the OS random source fails.
    pub fn issue_refresh_token(&self) -> Result<IssuedRefreshToken, AuthError> {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| AuthError::Hashing(format!("entropy source: {err}")))?;
        let plaintext = Base64UrlUnpadded::encode_string(&bytes);
        let hash = hash_refresh_token(&plaintext);
        Ok(IssuedRefreshToken { plaintext, hash })
    }
}

/// Digest a presented refresh token; raw values never touch the store.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn check_secret(secret: &SecretString) -> Result<(), AuthError> {
    if secret.expose_secret().len() < MIN_SECRET_BYTES {
        return Err(AuthError::Validation(format!(
            "signing secret must be at least {MIN_SECRET_BYTES} bytes"
        )));
    }
    Ok(())
}

fn mac_for(secret: &SecretString) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(value).map_err(|_| AuthError::Signing)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(value: &str) -> Option<T> {
    let bytes = Base64UrlUnpadded::decode_vec(value).ok()?;
    serde_json::from_slice(&bytes).ok()
}
