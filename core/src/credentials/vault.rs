//! On-disk home for issued credential artifacts.
//!
//! ```text
//! credentials/
//!   LOA950310/
//!     LOA950310.key         encrypted private key (0600 on unix)
//!     LOA950310.cer         PEM certificate
//!     LOA950310_firma.zip   both of the above, zipped
//! ```
//!
//! The service keeps these files so a user can re-download them after
//! registration. The key is only usable with the passphrase, which the
//! service never stores.
//!
//! Writes go through [`CredentialVault::stage`] first: the three files land
//! in a hidden `.<id>.staging-<pid>-<nonce>/` directory and only appear
//! under `<id>/` when [`StagedCredentials::commit`] renames it. Dropping an
//! uncommitted stage deletes it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use super::bundle::{bundle_file_name, certificate_entry_name, key_entry_name};
use crate::identity::Identifier;
use crate::storage::{StoreError, StoreResult};

/// The three downloadable artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialArtifact {
    PrivateKey,
    Certificate,
    Bundle,
}

impl CredentialArtifact {
    pub const ALL: [CredentialArtifact; 3] = [
        CredentialArtifact::PrivateKey,
        CredentialArtifact::Certificate,
        CredentialArtifact::Bundle,
    ];

    pub fn file_name(self, identifier: &Identifier) -> String {
        match self {
            CredentialArtifact::PrivateKey => key_entry_name(identifier),
            CredentialArtifact::Certificate => certificate_entry_name(identifier),
            CredentialArtifact::Bundle => bundle_file_name(identifier),
        }
    }

    /// Match a requested file name against this identifier's artifacts.
    /// Anything else is `None`, which keeps downloads to a closed set.
    pub fn from_file_name(identifier: &Identifier, name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|artifact| artifact.file_name(identifier) == name)
    }

    pub fn content_type(self) -> &'static str {
        match self {
            CredentialArtifact::PrivateKey => "application/pkcs8",
            CredentialArtifact::Certificate => "application/x-x509-user-cert",
            CredentialArtifact::Bundle => "application/zip",
        }
    }
}

/// Paths of a stored credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub key_path: PathBuf,
    pub certificate_path: PathBuf,
    pub bundle_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CredentialVault {
    root: PathBuf,
}

impl CredentialVault {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, identifier: &Identifier, artifact: CredentialArtifact) -> PathBuf {
        self.root
            .join(identifier.as_str())
            .join(artifact.file_name(identifier))
    }

    /// Write all three artifacts for `identifier` and publish them at once.
    pub fn store(
        &self,
        identifier: &Identifier,
        key_blob: &[u8],
        certificate_pem: &[u8],
        bundle: &[u8],
    ) -> StoreResult<StoredCredentials> {
        self.stage(identifier, key_blob, certificate_pem, bundle)?
            .commit()
    }

    /// Write all three artifacts into a fresh staging directory. Nothing is
    /// visible under the identifier's name until the stage is committed.
    pub fn stage(
        &self,
        identifier: &Identifier,
        key_blob: &[u8],
        certificate_pem: &[u8],
        bundle: &[u8],
    ) -> StoreResult<StagedCredentials> {
        fs::create_dir_all(&self.root)?;

        let mut nonce = [0u8; 8];
        OsRng.fill_bytes(&mut nonce);
        let staging_dir = self.root.join(format!(
            ".{identifier}.staging-{}-{}",
            std::process::id(),
            hex::encode(nonce)
        ));
        fs::create_dir(&staging_dir)?;

        // From here on, an early return drops the stage and cleans up.
        let staged = StagedCredentials {
            identifier: identifier.clone(),
            staging_dir,
            final_dir: self.root.join(identifier.as_str()),
            committed: false,
        };
        write_private(
            &staged.staged_path(CredentialArtifact::PrivateKey),
            key_blob,
        )?;
        fs::write(
            staged.staged_path(CredentialArtifact::Certificate),
            certificate_pem,
        )?;
        write_private(&staged.staged_path(CredentialArtifact::Bundle), bundle)?;

        Ok(staged)
    }

    pub fn read(
        &self,
        identifier: &Identifier,
        artifact: CredentialArtifact,
    ) -> StoreResult<Vec<u8>> {
        let path = self.artifact_path(identifier, artifact);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(artifact.file_name(identifier)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Credential files written but not yet published.
#[derive(Debug)]
pub struct StagedCredentials {
    identifier: Identifier,
    staging_dir: PathBuf,
    final_dir: PathBuf,
    committed: bool,
}

impl StagedCredentials {
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn staged_path(&self, artifact: CredentialArtifact) -> PathBuf {
        self.staging_dir.join(artifact.file_name(&self.identifier))
    }

    /// Rename the staging directory to `<root>/<id>/`.
    ///
    /// A stale directory already at that path is replaced; the caller holds
    /// the identifier's record, so nobody else owns it. Any other entry there
    /// fails the commit and the staged files are removed.
    pub fn commit(mut self) -> StoreResult<StoredCredentials> {
        match fs::symlink_metadata(&self.final_dir) {
            Ok(meta) if meta.is_dir() => {
                warn!(identifier = %self.identifier, "replacing stale credential directory");
                fs::remove_dir_all(&self.final_dir)?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::rename(&self.staging_dir, &self.final_dir)?;
        self.committed = true;

        let path = |artifact: CredentialArtifact| {
            self.final_dir.join(artifact.file_name(&self.identifier))
        };
        Ok(StoredCredentials {
            key_path: path(CredentialArtifact::PrivateKey),
            certificate_path: path(CredentialArtifact::Certificate),
            bundle_path: path(CredentialArtifact::Bundle),
        })
    }
}

impl Drop for StagedCredentials {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    staging_dir = %self.staging_dir.display(),
                    error = %e,
                    "failed to remove staged credentials"
                );
            }
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Identifier {
        Identifier::normalize("LOA950310").unwrap()
    }

    #[test]
    fn store_and_read_each_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());

        let stored = vault.store(&id(), b"KEY", b"CERT", b"ZIP").unwrap();
        assert_eq!(stored.key_path, dir.path().join("LOA950310/LOA950310.key"));
        assert_eq!(
            stored.bundle_path,
            dir.path().join("LOA950310/LOA950310_firma.zip")
        );

        assert_eq!(vault.read(&id(), CredentialArtifact::PrivateKey).unwrap(), b"KEY");
        assert_eq!(vault.read(&id(), CredentialArtifact::Certificate).unwrap(), b"CERT");
        assert_eq!(vault.read(&id(), CredentialArtifact::Bundle).unwrap(), b"ZIP");
    }

    #[test]
    fn reading_unknown_identifier_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        assert!(matches!(
            vault.read(&id(), CredentialArtifact::Certificate),
            Err(StoreError::NotFound(name)) if name == "LOA950310.cer"
        ));
    }

    #[test]
    fn artifact_names_are_a_closed_set() {
        let id = id();
        assert_eq!(
            CredentialArtifact::from_file_name(&id, "LOA950310.key"),
            Some(CredentialArtifact::PrivateKey)
        );
        assert_eq!(
            CredentialArtifact::from_file_name(&id, "LOA950310_firma.zip"),
            Some(CredentialArtifact::Bundle)
        );
        for bad in ["GAM011231.key", "../LOA950310.key", "LOA950310.json", ""] {
            assert_eq!(CredentialArtifact::from_file_name(&id, bad), None, "{bad:?}");
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn staged_files_stay_hidden_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());

        let staged = vault.stage(&id(), b"KEY", b"CERT", b"ZIP").unwrap();
        assert!(staged.staging_dir().join("LOA950310.key").exists());
        assert!(matches!(
            vault.read(&id(), CredentialArtifact::PrivateKey),
            Err(StoreError::NotFound(_))
        ));

        staged.commit().unwrap();
        assert_eq!(vault.read(&id(), CredentialArtifact::PrivateKey).unwrap(), b"KEY");
        assert_eq!(entries(dir.path()), vec!["LOA950310".to_string()]);
    }

    #[test]
    fn dropped_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());

        let staged = vault.stage(&id(), b"KEY", b"CERT", b"ZIP").unwrap();
        let staging_dir = staged.staging_dir().to_path_buf();
        drop(staged);

        assert!(!staging_dir.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn commit_onto_a_file_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        fs::write(dir.path().join("LOA950310"), b"in the way").unwrap();

        assert!(vault.store(&id(), b"KEY", b"CERT", b"ZIP").is_err());
        assert_eq!(entries(dir.path()), vec!["LOA950310".to_string()]);
        assert_eq!(fs::read(dir.path().join("LOA950310")).unwrap(), b"in the way");
    }

    #[test]
    fn commit_replaces_stale_directory() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        vault.store(&id(), b"OLD", b"OLD", b"OLD").unwrap();

        vault.store(&id(), b"KEY", b"CERT", b"ZIP").unwrap();
        assert_eq!(vault.read(&id(), CredentialArtifact::Certificate).unwrap(), b"CERT");
        assert_eq!(entries(dir.path()), vec!["LOA950310".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::new(dir.path());
        let stored = vault.store(&id(), b"KEY", b"CERT", b"ZIP").unwrap();
        let mode = fs::metadata(stored.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
