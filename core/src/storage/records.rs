//! User records and the file-backed record store.
//!
//! ## Layout
//!
//! ```text
//! <users_dir>/
//!   LOA950310.json
//!   GAM011231.json
//! ```
//!
//! ## Write Path
//!
//! 1. Take the per-identifier lock (serializes same-process writers).
//! 2. Write the JSON to a dot-prefixed temp file unique to this writer
//!    (process id plus a random suffix).
//! 3. Hard-link the temp file to its final name. The link fails if the
//!    name exists, which makes the existence check and the write one atomic
//!    step even across processes.
//! 4. Remove the temp file.
//!
//! Readers never observe a half-written record.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};
use crate::identity::Identifier;

// ---------------------------------------------------------------------------
// UserRecord
// ---------------------------------------------------------------------------

/// A registered user. Created once at registration, never modified.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub identifier: Identifier,
    pub given_name: String,
    pub surname: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 fingerprint of the certificate issued at registration.
    #[serde(default)]
    pub certificate_fingerprint: Option<String>,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("identifier", &self.identifier)
            .field("given_name", &self.given_name)
            .field("surname", &self.surname)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("certificate_fingerprint", &self.certificate_fingerprint)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// UserRecordStore
// ---------------------------------------------------------------------------

/// Persistence for user records, keyed by identifier.
///
/// Implementations must make `save` fail with [`StoreError::Conflict`] when
/// the identifier already exists, atomically with respect to concurrent
/// `save` calls for the same identifier.
pub trait UserRecordStore: Send + Sync {
    fn exists(&self, identifier: &Identifier) -> StoreResult<bool>;

    fn save(&self, record: &UserRecord) -> StoreResult<()>;

    /// [`StoreError::NotFound`] if absent.
    fn load(&self, identifier: &Identifier) -> StoreResult<UserRecord>;

    /// Delete a record. Only used to release an identifier whose
    /// registration did not finish. Returns whether a record was removed.
    fn remove(&self, identifier: &Identifier) -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// FileRecordStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per user.
#[derive(Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
    locks: DashMap<Identifier, Arc<Mutex<()>>>,
}

impl FileRecordStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open<P: Into<PathBuf>>(dir: P) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, identifier: &Identifier) -> PathBuf {
        self.dir.join(format!("{identifier}.json"))
    }

    fn temp_path(&self, identifier: &Identifier) -> PathBuf {
        let mut nonce = [0u8; 8];
        OsRng.fill_bytes(&mut nonce);
        self.dir.join(format!(
            ".{identifier}.{}.{}.json.tmp",
            std::process::id(),
            hex::encode(nonce)
        ))
    }

    fn lock_for(&self, identifier: &Identifier) -> Arc<Mutex<()>> {
        self.locks.entry(identifier.clone()).or_default().clone()
    }

    fn write_exclusive(&self, record: &UserRecord) -> StoreResult<()> {
        let path = self.record_path(&record.identifier);
        if path.try_exists()? {
            return Err(StoreError::Conflict(record.identifier.to_string()));
        }

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.temp_path(&record.identifier);
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::Conflict(record.identifier.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl UserRecordStore for FileRecordStore {
    fn exists(&self, identifier: &Identifier) -> StoreResult<bool> {
        Ok(self.record_path(identifier).try_exists()?)
    }

    fn save(&self, record: &UserRecord) -> StoreResult<()> {
        let lock = self.lock_for(&record.identifier);
        let result = {
            let _guard = lock.lock();
            self.write_exclusive(record)
        };
        drop(lock);

        // Only the map holds the lock now unless another writer grabbed it.
        self.locks
            .remove_if(&record.identifier, |_, l| Arc::strong_count(l) == 1);

        result
    }

    fn load(&self, identifier: &Identifier) -> StoreResult<UserRecord> {
        let bytes = match fs::read(self.record_path(identifier)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(identifier.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn remove(&self, identifier: &Identifier) -> StoreResult<bool> {
        let lock = self.lock_for(identifier);
        let result = {
            let _guard = lock.lock();
            match fs::remove_file(self.record_path(identifier)) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        };
        drop(lock);
        self.locks
            .remove_if(identifier, |_, l| Arc::strong_count(l) == 1);
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
