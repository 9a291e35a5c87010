//! # Storage Module
//!
//! Everything that touches disk lives here.
//!
//! ```text
//! records.rs   - UserRecord, the UserRecordStore trait, one-JSON-file-per-user backend
//! db.rs        - FirmaDB: sled trees for users (alternate backend) and sessions
//! documents.rs - Signed PDF store, one directory per identifier
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Records are write-once.** `save` on an existing identifier is a
//!    conflict, never an overwrite. Both backends enforce this atomically:
//!    the file backend with a hard link that refuses to clobber, sled with
//!    compare-and-swap against an empty slot.
//!
//! 2. **JSON on the file backend, bincode in sled.** The file layout is meant
//!    to be inspected by operators; sled values never leave the process.

pub mod db;
pub mod documents;
pub mod records;

pub use db::FirmaDB;
pub use documents::{DocumentEntry, DocumentError, DocumentStore};
pub use records::{FileRecordStore, UserRecord, UserRecordStore};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors raised by the record and session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identifier {0} is already registered")]
    Conflict(String),

    #[error("no record for {0}")]
    NotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
