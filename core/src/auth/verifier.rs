//! # Login Verification
//!
//! A login presents an identifier, a certificate, an encrypted private key,
//! and a passphrase. It succeeds only if every step below passes, in order:
//!
//! ```text
//! 1. record exists for identifier           else UserNotFound
//! 2. passphrase verifies against Argon2 hash else BadPassword
//! 3. key blob decrypts under passphrase      else BadKey
//! 4. certificate parses                      else MalformedCertificate
//! 5. cert public key == key's public key     else KeyCertMismatch
//! ```
//!
//! Steps 2 and 3 test the same passphrase against two different secrets.
//! Both are enforced, but together they are one factor, not two.
//!
//! A cleartext key blob fails step 3: possession of a passphrase-protected
//! key is part of the proof.
//!
//! Storage faults during step 1 are not authentication failures. They come
//! back as [`FirmaError::Storage`] so operators see them as outages.

use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use super::session::{SessionGrant, SessionStore};
use super::{AuthError, AuthFailure};
use crate::crypto::{hash_password, verify_password, Certificate, KeyBlob};
use crate::error::{FirmaError, FirmaResult};
use crate::identity::Identifier;
use crate::storage::{StoreError, UserRecordStore};

/// Checks login attempts against the record store and issues sessions.
#[derive(Clone)]
pub struct Verifier {
    records: Arc<dyn UserRecordStore>,
    sessions: SessionStore,
}

impl Verifier {
    pub fn new(records: Arc<dyn UserRecordStore>, sessions: SessionStore) -> Self {
        Self { records, sessions }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run the full check and, on success, issue a session.
    pub fn authenticate(
        &self,
        identifier: &str,
        certificate: &[u8],
        key_blob: &[u8],
        passphrase: &str,
    ) -> FirmaResult<SessionGrant> {
        let identifier = self.verify(identifier, certificate, key_blob, passphrase)?;
        let grant = self.sessions.issue(&identifier)?;
        info!(identifier = %identifier, "login succeeded");
        Ok(grant)
    }

    /// Run the check without issuing a session. Returns the normalized identifier.
    pub fn verify(
        &self,
        identifier: &str,
        certificate: &[u8],
        key_blob: &[u8],
        passphrase: &str,
    ) -> FirmaResult<Identifier> {
        match self.check(identifier, certificate, key_blob, passphrase) {
            Ok(id) => Ok(id),
            Err(FirmaError::Auth(err)) => {
                warn!(
                    identifier = %identifier.trim(),
                    reason = err.kind().as_str(),
                    "authentication failed"
                );
                Err(err.into())
            }
            Err(other) => Err(other),
        }
    }

    fn check(
        &self,
        identifier: &str,
        certificate: &[u8],
        key_blob: &[u8],
        passphrase: &str,
    ) -> FirmaResult<Identifier> {
        // 1. Record lookup.
        let Some(id) = Identifier::normalize(identifier) else {
            burn_hash_time(passphrase);
            return Err(fail(AuthFailure::UserNotFound));
        };
        let record = match self.records.load(&id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                burn_hash_time(passphrase);
                return Err(fail(AuthFailure::UserNotFound));
            }
            Err(e) => return Err(e.into()),
        };

        // 2. Password hash.
        if !verify_password(passphrase, &record.password_hash)? {
            return Err(fail(AuthFailure::BadPassword));
        }

        // 3. Key decryption.
        let keypair = KeyBlob::from_pem(key_blob.to_vec())
            .and_then(|blob| blob.unlock(Some(passphrase)))
            .map_err(|_| fail(AuthFailure::BadKey))?;

        // 4. Certificate parse.
        let cert_key = Certificate::parse(certificate)
            .and_then(|cert| cert.public_key())
            .map_err(|_| fail(AuthFailure::MalformedCertificate))?;

        // 5. Key match.
        if !keypair.public_key()?.same_key(&cert_key) {
            return Err(fail(AuthFailure::KeyCertMismatch));
        }

        Ok(id)
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

fn fail(kind: AuthFailure) -> FirmaError {
    FirmaError::Auth(AuthError::new(kind))
}

/// Spend one Argon2 verification on unknown users so response time does not
/// reveal whether an identifier is registered.
fn burn_hash_time(passphrase: &str) {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY.get_or_init(|| hash_password("firma-timing-equalizer").ok());
    if let Some(hash) = dummy {
        let _ = verify_password(passphrase, hash);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::issue;
    use crate::identity::IdentityClaims;
    use crate::storage::{FirmaDB, UserRecord};
    use chrono::Utc;

    struct Fixture {
        verifier: Verifier,
        key: Vec<u8>,
        cert: Vec<u8>,
    }

    fn fixture() -> Fixture {
        let db = FirmaDB::open_temporary().unwrap();
        let claims = IdentityClaims::new("Ana", "Lopez", "ana@example.com");
        let issued = issue(&claims, Some("correctpass")).unwrap();

        let record = UserRecord {
            identifier: Identifier::normalize("LOA950310").unwrap(),
            given_name: "Ana".into(),
            surname: "Lopez".into(),
            email: "ana@example.com".into(),
            password_hash: hash_password("correctpass").unwrap(),
            created_at: Utc::now(),
            certificate_fingerprint: Some(issued.fingerprint.clone()),
        };
        db.save(&record).unwrap();

        let records: Arc<dyn UserRecordStore> = Arc::new(db.clone());
        Fixture {
            verifier: Verifier::new(records, SessionStore::new(db, None)),
            key: issued.key_blob.as_bytes().to_vec(),
            cert: issued.certificate_pem,
        }
    }

    fn failure(result: FirmaResult<impl std::fmt::Debug>) -> AuthFailure {
        match result {
            Err(FirmaError::Auth(err)) => err.kind(),
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_login_issues_session() {
        let f = fixture();
        let grant = f
            .verifier
            .authenticate("LOA950310", &f.cert, &f.key, "correctpass")
            .unwrap();
        assert_eq!(grant.session.identifier.as_str(), "LOA950310");

        let resolved = f.verifier.sessions().resolve(grant.token.as_str()).unwrap();
        assert_eq!(resolved, Some(grant.session));
    }

    #[test]
    fn identifier_is_normalized_before_lookup() {
        let f = fixture();
        let id = f
            .verifier
            .verify("  loa950310 ", &f.cert, &f.key, "correctpass")
            .unwrap();
        assert_eq!(id.as_str(), "LOA950310");
    }

    #[test]
    fn unknown_and_malformed_identifiers_are_user_not_found() {
        let f = fixture();
        for id in ["XYZ000101", "", "../etc", "LOA 950310"] {
            assert_eq!(
                failure(f.verifier.verify(id, &f.cert, &f.key, "correctpass")),
                AuthFailure::UserNotFound,
                "{id:?}"
            );
        }
    }

    #[test]
    fn wrong_passphrase_is_bad_password() {
        let f = fixture();
        assert_eq!(
            failure(f.verifier.verify("LOA950310", &f.cert, &f.key, "wrongpass")),
            AuthFailure::BadPassword
        );
    }

    #[test]
    fn foreign_or_garbage_key_is_bad_key() {
        let f = fixture();
        // Encrypted under a different passphrase than the account's.
        let claims = IdentityClaims::new("Ana", "Lopez", "ana@example.com");
        let foreign = issue(&claims, Some("otherpass")).unwrap();
        assert_eq!(
            failure(f.verifier.verify(
                "LOA950310",
                &f.cert,
                foreign.key_blob.as_bytes(),
                "correctpass"
            )),
            AuthFailure::BadKey
        );

        assert_eq!(
            failure(f.verifier.verify("LOA950310", &f.cert, b"not a key", "correctpass")),
            AuthFailure::BadKey
        );
    }

    #[test]
    fn cleartext_key_is_bad_key() {
        let f = fixture();
        let keypair = KeyBlob::from_pem(f.key.clone())
            .unwrap()
            .unlock(Some("correctpass"))
            .unwrap();
        let clear = keypair.to_key_blob(None).unwrap();
        assert_eq!(
            failure(f.verifier.verify("LOA950310", &f.cert, clear.as_bytes(), "correctpass")),
            AuthFailure::BadKey
        );
    }

    #[test]
    fn unparsable_certificate_is_reported() {
        let f = fixture();
        assert_eq!(
            failure(f.verifier.verify("LOA950310", b"garbage", &f.key, "correctpass")),
            AuthFailure::MalformedCertificate
        );
    }

    #[test]
    fn certificate_for_other_key_is_mismatch() {
        let f = fixture();
        let claims = IdentityClaims::new("Ana", "Lopez", "ana@example.com");
        let other = issue(&claims, Some("correctpass")).unwrap();
        assert_eq!(
            failure(f.verifier.verify(
                "LOA950310",
                &other.certificate_pem,
                &f.key,
                "correctpass"
            )),
            AuthFailure::KeyCertMismatch
        );
    }

    #[test]
    fn failures_share_one_message() {
        let f = fixture();
        let attempts = [
            f.verifier.verify("NOPE000101", &f.cert, &f.key, "correctpass"),
            f.verifier.verify("LOA950310", &f.cert, &f.key, "wrongpass"),
            f.verifier.verify("LOA950310", b"garbage", &f.key, "correctpass"),
        ];
        for attempt in attempts {
            assert_eq!(attempt.unwrap_err().to_string(), "authentication failed");
        }
    }
}
