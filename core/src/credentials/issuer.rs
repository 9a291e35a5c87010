//! # Credential Issuance
//!
//! `issue(claims, passphrase)` is the whole registration crypto path:
//!
//! ```text
//! RSA-2048 keygen ──► self-signed X.509 (claims, 1y, SHA-256)
//!        │
//!        └──► PKCS#8 PEM ──► encrypted under passphrase ──► KeyBlob
//! ```
//!
//! The returned bundle is consistent by construction: the certificate's
//! public key is the keypair's public key, and the blob unlocks to that same
//! keypair. Tests below hold us to it.
//!
//! Key generation is CPU-bound and takes a noticeable fraction of a second.
//! Async callers must run this on a blocking thread.

use chrono::{DateTime, Utc};

use crate::config::RSA_KEY_BITS;
use crate::crypto::{Certificate, CryptoError, KeyBlob, RsaKeypair};
use crate::identity::IdentityClaims;

/// Everything produced by a single issuance.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    /// Private key, encrypted unless issued without a passphrase.
    pub key_blob: KeyBlob,
    pub certificate: Certificate,
    /// PEM encoding of `certificate`, as handed to the user.
    pub certificate_pem: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Serial number, uppercase hex.
    pub serial: String,
    /// SHA-256 fingerprint of the DER certificate.
    pub fingerprint: String,
}

/// Issues keypairs and certificates at a fixed key strength.
#[derive(Debug, Clone, Copy)]
pub struct CredentialIssuer {
    rsa_bits: u32,
}

impl Default for CredentialIssuer {
    fn default() -> Self {
        Self {
            rsa_bits: RSA_KEY_BITS,
        }
    }
}

impl CredentialIssuer {
    /// `rsa_bits` below [`RSA_KEY_BITS`] is raised to the minimum.
    pub fn new(rsa_bits: u32) -> Self {
        Self {
            rsa_bits: rsa_bits.max(RSA_KEY_BITS),
        }
    }

    pub fn rsa_bits(&self) -> u32 {
        self.rsa_bits
    }

    /// Issue credentials valid from now.
    ///
    /// With `passphrase = None` the key blob is cleartext and comes back as
    /// [`KeyBlob::Cleartext`]; callers that persist it are on their own.
    pub fn issue(
        &self,
        claims: &IdentityClaims,
        passphrase: Option<&str>,
    ) -> Result<IssuedCredentials, CryptoError> {
        self.issue_at(claims, passphrase, Utc::now())
    }

    /// Issue credentials valid from `issued_at`.
    pub fn issue_at(
        &self,
        claims: &IdentityClaims,
        passphrase: Option<&str>,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedCredentials, CryptoError> {
        let keypair = RsaKeypair::generate(self.rsa_bits)?;
        let certificate = Certificate::self_signed(claims, &keypair, issued_at)?;

        // Belt and braces: never hand out a certificate for a different key.
        if certificate.public_key()? != keypair.public_key()? {
            return Err(CryptoError::CertificateBuild(
                "certificate public key does not match generated keypair".to_string(),
            ));
        }

        let key_blob = keypair.to_key_blob(passphrase)?;
        let certificate_pem = certificate.to_pem()?;

        Ok(IssuedCredentials {
            not_before: certificate.not_before()?,
            not_after: certificate.not_after()?,
            serial: certificate.serial_hex()?,
            fingerprint: certificate.fingerprint_sha256()?,
            key_blob,
            certificate,
            certificate_pem,
        })
    }
}

/// Issue with the default key strength.
pub fn issue(
    claims: &IdentityClaims,
    passphrase: Option<&str>,
) -> Result<IssuedCredentials, CryptoError> {
    CredentialIssuer::default().issue(claims, passphrase)
}
