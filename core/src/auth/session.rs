//! Server-side sessions.
//!
//! A session token is 32 random bytes, hex encoded, handed to the client
//! once. The database stores only `SHA-256(token)` as the key, so tokens
//! cannot be recovered from storage. Expiry is optional. An expired session
//! is removed when its token is presented, and every issue with a TTL set
//! also sweeps the sessions nobody came back for.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::SESSION_TOKEN_BYTES;
use crate::identity::Identifier;
use crate::storage::{FirmaDB, StoreResult};

/// Proof of an earlier successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identifier: Identifier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Opaque bearer token. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// A freshly issued session and the token that refers to it.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub token: SessionToken,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    db: FirmaDB,
    ttl: Option<chrono::Duration>,
}

impl SessionStore {
    /// A `ttl` too large for chrono is treated as no expiry.
    pub fn new(db: FirmaDB, ttl: Option<Duration>) -> Self {
        let ttl = ttl.and_then(|d| chrono::Duration::from_std(d).ok());
        Self { db, ttl }
    }

    pub fn issue(&self, identifier: &Identifier) -> StoreResult<SessionGrant> {
        self.issue_at(identifier, Utc::now())
    }

    pub fn issue_at(
        &self,
        identifier: &Identifier,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionGrant> {
        if self.ttl.is_some() {
            self.purge_expired_at(now)?;
        }

        let token = SessionToken::generate();
        let session = Session {
            identifier: identifier.clone(),
            issued_at: now,
            expires_at: self.ttl.and_then(|ttl| now.checked_add_signed(ttl)),
        };
        self.db.put_session(&digest(token.as_str()), &session)?;
        debug!(identifier = %identifier, "session issued");
        Ok(SessionGrant { token, session })
    }

    /// Look up a live session by token.
    pub fn resolve(&self, token: &str) -> StoreResult<Option<Session>> {
        self.resolve_at(token, Utc::now())
    }

    pub fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let key = digest(token);
        match self.db.get_session(&key)? {
            Some(session) if session.is_expired_at(now) => {
                self.db.remove_session(&key)?;
                debug!(identifier = %session.identifier, "expired session dropped");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Drop every session already expired at `now`. Returns the count.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self.db.remove_sessions_where(|s| s.is_expired_at(now))?;
        if removed > 0 {
            debug!(removed, "expired sessions purged");
        }
        Ok(removed)
    }

    /// Returns whether a session existed for the token.
    pub fn revoke(&self, token: &str) -> StoreResult<bool> {
        self.db.remove_session(&digest(token))
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
