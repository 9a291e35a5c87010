//! # FirmaDB - Embedded Key-Value Store
//!
//! sled-backed storage for sessions and, when configured, user records.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                          | Value               |
//! |------------|------------------------------|---------------------|
//! | `users`    | identifier (UTF-8)           | `bincode(UserRecord)` |
//! | `sessions` | SHA-256 of session token     | `bincode(Session)`  |
//!
//! Session tokens are never stored in the clear. A copy of the database is
//! not a set of live bearer tokens.
//!
//! ## Atomicity
//!
//! User inserts go through `compare_and_swap(key, None, Some(value))`. Two
//! concurrent registrations for one identifier cannot both succeed: the loser
//! sees a non-empty slot and gets a conflict.

use std::path::Path;

use sled::{Db, Tree};

use super::records::{UserRecord, UserRecordStore};
use super::{StoreError, StoreResult};
use crate::auth::Session;
use crate::identity::Identifier;

/// Persistent storage handle. Cheap to clone; clones share the same trees.
#[derive(Debug, Clone)]
pub struct FirmaDB {
    db: Db,
    users: Tree,
    sessions: Tree,
}

impl FirmaDB {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database, removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let users = db.open_tree("users")?;
        let sessions = db.open_tree("sessions")?;
        Ok(Self {
            db,
            users,
            sessions,
        })
    }

    // -- Session operations -------------------------------------------------

    /// Store a session under the digest of its token.
    pub fn put_session(&self, token_digest: &[u8], session: &Session) -> StoreResult<()> {
        let bytes = encode(session)?;
        self.sessions.insert(token_digest, bytes)?;
        Ok(())
    }

    pub fn get_session(&self, token_digest: &[u8]) -> StoreResult<Option<Session>> {
        match self.sessions.get(token_digest)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns whether a session was removed.
    pub fn remove_session(&self, token_digest: &[u8]) -> StoreResult<bool> {
        Ok(self.sessions.remove(token_digest)?.is_some())
    }

    /// Remove every session `stale` selects. Returns how many were removed.
    pub fn remove_sessions_where<F>(&self, stale: F) -> StoreResult<usize>
    where
        F: Fn(&Session) -> bool,
    {
        let mut removed = 0;
        for entry in self.sessions.iter() {
            let (key, bytes) = entry?;
            let session: Session = decode(&bytes)?;
            if stale(&session) && self.sessions.remove(key)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // -- User operations ----------------------------------------------------

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl UserRecordStore for FirmaDB {
    fn exists(&self, identifier: &Identifier) -> StoreResult<bool> {
        Ok(self.users.contains_key(identifier.as_str().as_bytes())?)
    }

    fn save(&self, record: &UserRecord) -> StoreResult<()> {
        let key = record.identifier.as_str().as_bytes();
        let bytes = encode(record)?;
        match self
            .users
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.users.flush()?;
                Ok(())
            }
            Err(_) => Err(StoreError::Conflict(record.identifier.to_string())),
        }
    }

    fn load(&self, identifier: &Identifier) -> StoreResult<UserRecord> {
        match self.users.get(identifier.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(identifier.to_string())),
        }
    }

    fn remove(&self, identifier: &Identifier) -> StoreResult<bool> {
        let removed = self.users.remove(identifier.as_str().as_bytes())?.is_some();
        self.users.flush()?;
        Ok(removed)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
