//! One-way salted password hashing for local credentials (Argon2id, PHC strings).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use super::error::AuthError;

/// Hash a plaintext password with a fresh random salt embedded in the output.
///
/// # Errors
/// Returns `AuthError::Hashing` when the salt source or the algorithm fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hashing(err.to_string()))
}

/// Check a plaintext password against a stored PHC string.
///
/// A mismatch is `Ok(false)`, never an error.
///
/// # Errors
/// Returns `AuthError::Hashing` when the stored hash cannot be parsed or the
/// algorithm fails internally.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|err| AuthError::Hashing(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(AuthError::Hashing(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn hash_is_phc_argon2() -> Result<()> {
        let hash = hash_password("secret1")?;
        assert!(hash.starts_with("$argon2id$"));
        Ok(())
    }

    #[test]
    fn same_password_gets_different_salts() -> Result<()> {
        assert_ne!(hash_password("secret1")?, hash_password("secret1")?);
        Ok(())
    }

    #[test]
    fn verify_accepts_match_and_rejects_mismatch() -> Result<()> {
        let hash = hash_password("secret1")?;
        assert!(verify_password("secret1", &hash)?);
        assert!(!verify_password("wrong", &hash)?);
        Ok(())
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(matches!(
            verify_password("secret1", "not-a-phc-string"),
            Err(AuthError::Hashing(_))
        ));
    }
}
