//! # Credential Service
//!
//! The one entry point the HTTP layer talks to. Owns every store and runs
//! the two flows end to end:
//!
//! ```text
//! register: validate ─► exists? ─► issue ─► hash ─► stage files ─► save (atomic) ─► publish
//! login:    Verifier::authenticate ─► session token
//! ```
//!
//! All methods are synchronous and some are CPU-heavy (RSA keygen, Argon2,
//! PBES2 decryption). Async callers run them on a blocking thread.
//!
//! ## Registration Ordering
//!
//! Credential files are written to a private staging directory before the
//! record is saved, and published by rename only after `save` wins. Two
//! racing registrations for one identifier both pass the early `exists`
//! check, but only one wins `save`; the loser's staged files are dropped
//! without touching the winner's. If publishing fails after `save`, the
//! record is removed again so the identifier is not left claimed with no
//! credentials behind it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::auth::{Session, SessionGrant, SessionStore, Verifier};
use crate::config::{FirmaConfig, RecordBackend};
use crate::credentials::{bundle, CredentialArtifact, CredentialIssuer, CredentialVault, StoredCredentials};
use crate::crypto::hash_password;
use crate::error::{FirmaError, FirmaResult};
use crate::identity::{Identifier, RegistrationRequest};
use crate::storage::{
    DocumentEntry, DocumentStore, FileRecordStore, FirmaDB, StoreError, UserRecord,
    UserRecordStore,
};

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identifier: Identifier,
    pub serial: String,
    pub fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub stored: StoredCredentials,
}

pub struct CredentialService {
    config: FirmaConfig,
    records: Arc<dyn UserRecordStore>,
    issuer: CredentialIssuer,
    vault: CredentialVault,
    documents: DocumentStore,
    verifier: Verifier,
}

impl CredentialService {
    /// Validate `config`, create the storage layout, and open every store.
    pub fn open(config: FirmaConfig) -> FirmaResult<Self> {
        config.validate()?;
        let layout = config.layout();
        layout.initialize()?;

        let db = FirmaDB::open(layout.database_dir())?;
        let records: Arc<dyn UserRecordStore> = match config.record_backend {
            RecordBackend::File => Arc::new(FileRecordStore::open(layout.users_dir())?),
            RecordBackend::Sled => Arc::new(db.clone()),
        };

        info!(
            data_dir = %config.data_dir.display(),
            backend = ?config.record_backend,
            "credential service ready"
        );
        Ok(Self::from_parts(config, records, db))
    }

    /// Assemble from already-open stores. File-based stores still live under
    /// `config.data_dir`.
    pub fn from_parts(
        config: FirmaConfig,
        records: Arc<dyn UserRecordStore>,
        db: FirmaDB,
    ) -> Self {
        let layout = config.layout();
        let sessions = SessionStore::new(db, config.session_ttl);
        Self {
            issuer: CredentialIssuer::new(config.rsa_bits),
            vault: CredentialVault::new(layout.credentials_dir()),
            documents: DocumentStore::new(layout.documents_dir()),
            verifier: Verifier::new(Arc::clone(&records), sessions),
            records,
            config,
        }
    }

    pub fn config(&self) -> &FirmaConfig {
        &self.config
    }

    // -- Registration -------------------------------------------------------

    pub fn register(&self, request: &RegistrationRequest) -> FirmaResult<Registration> {
        let validated = request.validate()?;
        let identifier = validated.identifier.clone();

        if self.records.exists(&identifier)? {
            warn!(identifier = %identifier, "registration rejected: identifier taken");
            return Err(FirmaError::Conflict(identifier.into_string()));
        }

        let issued = self
            .issuer
            .issue(&validated.claims, Some(&request.passphrase))?;
        let password_hash = hash_password(&request.passphrase)?;
        let archive = bundle(
            &identifier,
            issued.key_blob.as_bytes(),
            &issued.certificate_pem,
        )?;

        let record = UserRecord {
            identifier: identifier.clone(),
            given_name: validated.given_name,
            surname: validated.surname,
            email: validated.claims.email,
            password_hash,
            created_at: Utc::now(),
            certificate_fingerprint: Some(issued.fingerprint.clone()),
        };
        let staged = self.vault.stage(
            &identifier,
            issued.key_blob.as_bytes(),
            &issued.certificate_pem,
            &archive,
        )?;

        if let Err(e) = self.records.save(&record) {
            if matches!(e, StoreError::Conflict(_)) {
                warn!(identifier = %identifier, "registration lost race for identifier");
            }
            return Err(e.into());
        }

        let stored = match staged.commit() {
            Ok(stored) => stored,
            Err(e) => {
                error!(identifier = %identifier, error = %e, "credentials not published, releasing identifier");
                if let Err(rollback) = self.records.remove(&identifier) {
                    error!(identifier = %identifier, error = %rollback, "failed to release identifier");
                }
                return Err(e.into());
            }
        };

        info!(
            identifier = %identifier,
            serial = %issued.serial,
            fingerprint = %issued.fingerprint,
            not_after = %issued.not_after,
            "credentials issued"
        );

        Ok(Registration {
            identifier,
            serial: issued.serial,
            fingerprint: issued.fingerprint,
            not_before: issued.not_before,
            not_after: issued.not_after,
            stored,
        })
    }

    /// Read one issued artifact by its public file name.
    ///
    /// Names outside `<id>.key`, `<id>.cer`, `<id>_firma.zip` are `NotFound`.
    pub fn credential_file(
        &self,
        identifier: &str,
        file_name: &str,
    ) -> FirmaResult<(CredentialArtifact, Vec<u8>)> {
        let not_found = || FirmaError::NotFound(file_name.to_string());
        let identifier = Identifier::normalize(identifier).ok_or_else(not_found)?;
        let artifact =
            CredentialArtifact::from_file_name(&identifier, file_name).ok_or_else(not_found)?;
        let bytes = self.vault.read(&identifier, artifact)?;
        Ok((artifact, bytes))
    }

    // -- Sessions -----------------------------------------------------------

    pub fn login(
        &self,
        identifier: &str,
        certificate: &[u8],
        key_blob: &[u8],
        passphrase: &str,
    ) -> FirmaResult<SessionGrant> {
        self.verifier
            .authenticate(identifier, certificate, key_blob, passphrase)
    }

    /// Returns whether the token referred to a live session.
    pub fn logout(&self, token: &str) -> FirmaResult<bool> {
        let revoked = self.verifier.sessions().revoke(token)?;
        if revoked {
            info!("session revoked");
        }
        Ok(revoked)
    }

    pub fn resolve_session(&self, token: &str) -> FirmaResult<Option<Session>> {
        Ok(self.verifier.sessions().resolve(token)?)
    }

    // -- Signed documents ---------------------------------------------------

    pub fn list_documents(&self, session: &Session) -> FirmaResult<Vec<DocumentEntry>> {
        Ok(self.documents.list(&session.identifier)?)
    }

    pub fn upload_document(
        &self,
        session: &Session,
        file_name: &str,
        bytes: &[u8],
    ) -> FirmaResult<DocumentEntry> {
        let entry = self
            .documents
            .save(&session.identifier, file_name, bytes)?;
        info!(
            identifier = %session.identifier,
            document = %entry.name,
            size = entry.size,
            "document stored"
        );
        Ok(entry)
    }

    pub fn download_document(&self, session: &Session, file_name: &str) -> FirmaResult<Vec<u8>> {
        Ok(self.documents.open(&session.identifier, file_name)?)
    }
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("config", &self.config)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthFailure;
    use crate::credentials::extract;
    use crate::crypto::Certificate;

    fn request(given: &str, surname: &str, birthdate: &str) -> RegistrationRequest {
        RegistrationRequest {
            given_name: given.into(),
            surname: surname.into(),
            birthdate: birthdate.into(),
            email: "ana@example.com".into(),
            passphrase: "correctpass".into(),
        }
    }

    fn service(dir: &std::path::Path, backend: RecordBackend) -> CredentialService {
        let mut config = FirmaConfig::new(dir);
        config.record_backend = backend;
        CredentialService::open(config).unwrap()
    }

    #[test]
    fn register_writes_record_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::File);

        let reg = svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();
        assert_eq!(reg.identifier.as_str(), "LOA950310");
        assert!(dir.path().join("users/LOA950310.json").exists());
        assert!(reg.stored.key_path.exists());
        assert!(reg.stored.certificate_path.exists());
        assert!(reg.stored.bundle_path.exists());

        let cert = std::fs::read(&reg.stored.certificate_path).unwrap();
        let cert = Certificate::parse(&cert).unwrap();
        assert_eq!(cert.common_name().as_deref(), Some("Ana Lopez"));
        assert_eq!(cert.fingerprint_sha256().unwrap(), reg.fingerprint);
    }

    #[test]
    fn bundle_matches_loose_files() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::File);
        let reg = svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();

        let archive = std::fs::read(&reg.stored.bundle_path).unwrap();
        let (key, cert) = extract(&reg.identifier, &archive).unwrap();
        assert_eq!(key, std::fs::read(&reg.stored.key_path).unwrap());
        assert_eq!(cert, std::fs::read(&reg.stored.certificate_path).unwrap());
    }

    #[test]
    fn duplicate_registration_is_conflict_on_both_backends() {
        for backend in [RecordBackend::File, RecordBackend::Sled] {
            let dir = tempfile::tempdir().unwrap();
            let svc = service(dir.path(), backend);
            svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();

            // Different person, same derived identifier.
            let err = svc
                .register(&request("Alberto", "Loera", "1995-03-10"))
                .unwrap_err();
            assert!(matches!(err, FirmaError::Conflict(ref id) if id == "LOA950310"), "{backend:?}");
        }
    }

    fn credential_entries(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(dir.join("credentials"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn failed_credential_write_releases_identifier() {
        for backend in [RecordBackend::File, RecordBackend::Sled] {
            let dir = tempfile::tempdir().unwrap();
            let svc = service(dir.path(), backend);
            let blocker = dir.path().join("credentials/LOA950310");
            std::fs::write(&blocker, b"in the way").unwrap();

            let err = svc
                .register(&request("Ana", "Lopez", "1995-03-10"))
                .unwrap_err();
            assert!(matches!(err, FirmaError::Storage(_)), "{backend:?}: {err}");

            let id = Identifier::normalize("LOA950310").unwrap();
            assert!(!svc.records.exists(&id).unwrap(), "{backend:?}");
            assert_eq!(credential_entries(dir.path()), vec!["LOA950310".to_string()]);

            std::fs::remove_file(&blocker).unwrap();
            let reg = svc
                .register(&request("Ana", "Lopez", "1995-03-10"))
                .unwrap();
            assert!(reg.stored.key_path.exists(), "{backend:?}");
            assert!(svc.records.exists(&id).unwrap());
        }
    }

    /// Reports every identifier as free, so `save` is the first place a
    /// taken identifier is noticed.
    struct StaleExists(FileRecordStore);

    impl UserRecordStore for StaleExists {
        fn exists(&self, _: &Identifier) -> crate::storage::StoreResult<bool> {
            Ok(false)
        }
        fn save(&self, record: &UserRecord) -> crate::storage::StoreResult<()> {
            self.0.save(record)
        }
        fn load(&self, identifier: &Identifier) -> crate::storage::StoreResult<UserRecord> {
            self.0.load(identifier)
        }
        fn remove(&self, identifier: &Identifier) -> crate::storage::StoreResult<bool> {
            self.0.remove(identifier)
        }
    }

    #[test]
    fn losing_registration_leaves_winner_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = FirmaConfig::new(dir.path());
        config.layout().initialize().unwrap();
        let records = StaleExists(FileRecordStore::open(config.layout().users_dir()).unwrap());
        let svc = CredentialService::from_parts(
            config,
            Arc::new(records),
            FirmaDB::open_temporary().unwrap(),
        );

        let reg = svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();
        let winner_key = std::fs::read(&reg.stored.key_path).unwrap();

        let err = svc
            .register(&request("Alberto", "Loera", "1995-03-10"))
            .unwrap_err();
        assert!(matches!(err, FirmaError::Conflict(_)));

        assert_eq!(std::fs::read(&reg.stored.key_path).unwrap(), winner_key);
        assert_eq!(credential_entries(dir.path()), vec!["LOA950310".to_string()]);
        let id = Identifier::normalize("LOA950310").unwrap();
        assert_eq!(svc.records.load(&id).unwrap().given_name, "Ana");
    }

    #[test]
    fn invalid_request_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::File);

        let mut bad = request("Ana", "L", "1995-03-10");
        assert!(matches!(svc.register(&bad), Err(FirmaError::Validation(_))));

        bad = request("Ana", "Lopez", "1995-13-10");
        assert!(matches!(svc.register(&bad), Err(FirmaError::Validation(_))));

        assert_eq!(std::fs::read_dir(dir.path().join("users")).unwrap().count(), 0);
        assert_eq!(
            std::fs::read_dir(dir.path().join("credentials")).unwrap().count(),
            0
        );
    }

    #[test]
    fn login_then_logout() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::Sled);
        let reg = svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();

        let key = std::fs::read(&reg.stored.key_path).unwrap();
        let cert = std::fs::read(&reg.stored.certificate_path).unwrap();

        let grant = svc.login("LOA950310", &cert, &key, "correctpass").unwrap();
        let token = grant.token.as_str();
        assert!(svc.resolve_session(token).unwrap().is_some());

        assert!(svc.logout(token).unwrap());
        assert!(svc.resolve_session(token).unwrap().is_none());

        let err = svc.login("LOA950310", &cert, &key, "wrongpass").unwrap_err();
        assert!(matches!(err, FirmaError::Auth(e) if e.kind() == AuthFailure::BadPassword));
    }

    #[test]
    fn credential_downloads_are_whitelisted() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::File);
        svc.register(&request("Ana", "Lopez", "1995-03-10")).unwrap();

        let (artifact, bytes) = svc
            .credential_file("LOA950310", "LOA950310_firma.zip")
            .unwrap();
        assert_eq!(artifact, CredentialArtifact::Bundle);
        assert!(bytes.starts_with(b"PK"));

        for name in ["LOA950310.json", "../users/LOA950310.json", "GAM011231.key"] {
            assert!(matches!(
                svc.credential_file("LOA950310", name),
                Err(FirmaError::NotFound(_))
            ));
        }
    }

    #[test]
    fn documents_are_scoped_to_session_owner() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), RecordBackend::File);
        let ana = Session {
            identifier: Identifier::normalize("LOA950310").unwrap(),
            issued_at: Utc::now(),
            expires_at: None,
        };
        let other = Session {
            identifier: Identifier::normalize("GAM011231").unwrap(),
            ..ana.clone()
        };

        svc.upload_document(&ana, "contrato.pdf", b"%PDF-1.4").unwrap();
        assert_eq!(svc.list_documents(&ana).unwrap().len(), 1);
        assert!(svc.list_documents(&other).unwrap().is_empty());
        assert_eq!(svc.download_document(&ana, "contrato.pdf").unwrap(), b"%PDF-1.4");
        assert!(matches!(
            svc.upload_document(&ana, "virus.exe", b"MZ"),
            Err(FirmaError::Document(_))
        ));
    }

    #[test]
    fn weak_key_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FirmaConfig::new(dir.path());
        config.rsa_bits = 1024;
        assert!(matches!(
            CredentialService::open(config),
            Err(FirmaError::Config(_))
        ));
    }
}
