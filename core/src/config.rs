//! # Configuration & Constants
//!
//! Every magic number in Firma lives here, next to the storage layout that
//! the rest of the crate is handed at startup. Nothing in this crate touches
//! the filesystem at import time: the binary builds a [`FirmaConfig`],
//! calls [`StorageLayout::initialize`], and passes the resulting handles down.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// RSA modulus size for issued keypairs. 2048 bits is the floor; operators
/// may raise it through [`FirmaConfig::rsa_bits`] but never lower it.
pub const RSA_KEY_BITS: u32 = 2048;

/// Certificate validity in calendar months. Twelve months, not 365 days:
/// a certificate issued on 2024-03-01 expires on 2025-03-01.
pub const CERT_VALIDITY_MONTHS: u32 = 12;

/// Serial numbers are drawn uniformly from `[0, 2^128)`.
pub const SERIAL_NUMBER_BITS: i32 = 128;

/// X.509 version field value for v3 certificates (the field is zero-based).
pub const X509_VERSION_3: i32 = 2;

/// Shortest passphrase accepted at registration.
pub const MIN_PASSPHRASE_LENGTH: usize = 8;

/// Birthdates arrive as ISO-8601 calendar dates.
pub const BIRTHDATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// File Naming
// ---------------------------------------------------------------------------

/// Extension of the private key blob inside credential directories and bundles.
pub const KEY_EXTENSION: &str = "key";

/// Extension of the certificate inside credential directories and bundles.
pub const CERT_EXTENSION: &str = "cer";

/// Suffix of the downloadable credential bundle: `<id>_firma.zip`.
pub const BUNDLE_SUFFIX: &str = "_firma.zip";

/// Only this extension is accepted by the signed-document store.
pub const DOCUMENT_EXTENSION: &str = ".pdf";

/// Name of the session cookie handed out after a successful login.
pub const SESSION_COOKIE_NAME: &str = "firma_session";

/// Random bytes in a session token before hex encoding.
pub const SESSION_TOKEN_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Directory Names
// ---------------------------------------------------------------------------

pub const USERS_DIR: &str = "users";
pub const CREDENTIALS_DIR: &str = "credentials";
pub const DOCUMENTS_DIR: &str = "signed_pdfs";
pub const DATABASE_DIR: &str = "db";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while validating configuration or preparing storage.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rsa key size {0} is below the minimum of {RSA_KEY_BITS} bits")]
    KeyTooSmall(u32),

    #[error("unknown record backend '{0}' (expected 'file' or 'sled')")]
    UnknownBackend(String),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Storage Layout
// ---------------------------------------------------------------------------

/// On-disk layout rooted at the data directory.
///
/// ```text
/// <root>/
///   users/<id>.json              one record per identifier (file backend)
///   credentials/<id>/<id>.key    private key blob
///   credentials/<id>/<id>.cer    certificate
///   credentials/<id>/<id>_firma.zip
///   signed_pdfs/<id>/*.pdf
///   db/                          sled database (sessions, sled record backend)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join(USERS_DIR)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join(CREDENTIALS_DIR)
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }

    pub fn database_dir(&self) -> PathBuf {
        self.root.join(DATABASE_DIR)
    }

    /// Create every directory of the layout. Idempotent.
    pub fn initialize(&self) -> Result<(), ConfigError> {
        for dir in [
            self.root.clone(),
            self.users_dir(),
            self.credentials_dir(),
            self.documents_dir(),
            self.database_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        tracing::debug!(root = %self.root.display(), "storage layout initialized");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service Configuration
// ---------------------------------------------------------------------------

/// Where user records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordBackend {
    /// One JSON file per identifier under `users/`.
    #[default]
    File,
    /// A `users` tree inside the sled database.
    Sled,
}

impl FromStr for RecordBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sled" => Ok(Self::Sled),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Runtime configuration for the credential service.
#[derive(Debug, Clone)]
pub struct FirmaConfig {
    /// Root of the storage layout.
    pub data_dir: PathBuf,
    /// Backend used for user records.
    pub record_backend: RecordBackend,
    /// RSA modulus size for new keypairs.
    pub rsa_bits: u32,
    /// Session lifetime. `None` keeps sessions alive until logout.
    pub session_ttl: Option<Duration>,
}

impl FirmaConfig {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            record_backend: RecordBackend::default(),
            rsa_bits: RSA_KEY_BITS,
            session_ttl: None,
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.data_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rsa_bits < RSA_KEY_BITS {
            return Err(ConfigError::KeyTooSmall(self.rsa_bits));
        }
        Ok(())
    }
}
