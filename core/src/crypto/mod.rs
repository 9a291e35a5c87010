//! # Cryptographic Primitives for Firma
//!
//! Everything that touches key material lives under this module:
//!
//! - **RSA-2048** keypairs, because every PDF signing tool on the planet
//!   speaks RSA and most of them speak nothing else.
//! - **X.509 v3** self-signed certificates, SHA-256 signatures.
//! - **PKCS#8** private key encoding, encrypted under the user's passphrase
//!   (PBES2, AES-256-CBC) before it ever leaves memory.
//! - **Argon2id** for password hashes.
//!
//! The heavy lifting is OpenSSL and RustCrypto's `argon2`. This module is a
//! typed wrapper around them and nothing more.

pub mod certificate;
pub mod keys;
pub mod password;

pub use certificate::Certificate;
pub use keys::{KeyBlob, PublicKey, RsaKeypair};
pub use password::{hash_password, verify_password};

use thiserror::Error;

/// Errors raised by cryptographic operations.
///
/// Decryption failures are deliberately vague: the difference between a
/// wrong passphrase and a corrupted blob is nobody's business.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate construction failed: {0}")]
    CertificateBuild(String),

    #[error("certificate signing failed: {0}")]
    Signing(String),

    #[error("key serialization failed: {0}")]
    Serialization(String),

    #[error("certificate could not be parsed: {0}")]
    CertificateParse(String),

    #[error("unrecognized private key encoding")]
    UnrecognizedKeyFormat,

    #[error("private key could not be unlocked")]
    KeyUnlock,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl CryptoError {
    pub(crate) fn serialization(err: openssl::error::ErrorStack) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}
