//! # Auth Module
//!
//! Proof-of-possession login and the sessions it produces.
//!
//! ```text
//! verifier.rs - record lookup, Argon2 check, key unlock, key/cert match
//! session.rs  - opaque bearer tokens persisted in FirmaDB
//! ```
//!
//! ## Failure Reporting
//!
//! Every failed login surfaces as the same [`AuthError`], whose `Display`
//! is a single generic message. The specific [`AuthFailure`] kind is kept
//! inside the error for logs and metrics, and is never sent to the caller.
//! Telling "no such user" apart from "wrong password" over the wire would
//! hand out a user-enumeration oracle.

pub mod session;
pub mod verifier;

pub use session::{Session, SessionGrant, SessionStore, SessionToken};
pub use verifier::Verifier;

use std::fmt;

use thiserror::Error;

/// Why a login attempt failed. Internal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// No record for the identifier, or the identifier is malformed.
    UserNotFound,
    /// Passphrase did not match the stored hash.
    BadPassword,
    /// Key blob did not decrypt under the passphrase, or was not encrypted.
    BadKey,
    /// Certificate bytes could not be parsed.
    MalformedCertificate,
    /// Certificate public key differs from the decrypted key's public key.
    KeyCertMismatch,
}

impl AuthFailure {
    /// Stable label for metrics and structured logs.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthFailure::UserNotFound => "user_not_found",
            AuthFailure::BadPassword => "bad_password",
            AuthFailure::BadKey => "bad_key",
            AuthFailure::MalformedCertificate => "malformed_certificate",
            AuthFailure::KeyCertMismatch => "key_cert_mismatch",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed login. Displays identically regardless of kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("authentication failed")]
pub struct AuthError {
    kind: AuthFailure,
}

impl AuthError {
    pub fn new(kind: AuthFailure) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> AuthFailure {
        self.kind
    }
}

impl From<AuthFailure> for AuthError {
    fn from(kind: AuthFailure) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_retained_but_not_displayed() {
        let err = AuthError::new(AuthFailure::KeyCertMismatch);
        assert_eq!(err.kind(), AuthFailure::KeyCertMismatch);
        assert_eq!(err.to_string(), "authentication failed");
        assert_eq!(err.kind().as_str(), "key_cert_mismatch");
    }

    #[test]
    fn labels_are_distinct() {
        let labels = [
            AuthFailure::UserNotFound,
            AuthFailure::BadPassword,
            AuthFailure::BadKey,
            AuthFailure::MalformedCertificate,
            AuthFailure::KeyCertMismatch,
        ]
        .map(AuthFailure::as_str);
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
