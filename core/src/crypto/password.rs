//! Password hashing with Argon2id.
//!
//! The stored hash is a PHC string (`$argon2id$v=19$m=...`), so salt and
//! cost parameters travel with it and can be raised later without a
//! migration.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use super::CryptoError;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash.
///
/// `Ok(false)` means mismatch; `Err` means the stored hash itself is unusable.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(stored).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hash = hash_password("correctpass").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correctpass", &hash).unwrap());
        assert!(!verify_password("wrongpass", &hash).unwrap());
    }

    #[test]
    fn salts_make_hashes_unique() {
        let a = hash_password("correctpass").unwrap();
        let b = hash_password("correctpass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(verify_password("correctpass", "plaintext-oops").is_err());
    }
}
