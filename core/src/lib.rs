// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Firma - Core Library
//!
//! Self-issued signing credentials and proof-of-possession login.
//!
//! A user registers with a name, birthdate, email, and passphrase. Firma
//! derives a short identifier, generates an RSA-2048 keypair, binds it into a
//! self-signed X.509 certificate, encrypts the private key under the
//! passphrase, and hands both back in a zip. Logging in means presenting that
//! certificate and key again along with the passphrase.
//!
//! ## Architecture
//!
//! - **identity**: Identifier derivation and registration validation.
//! - **crypto**: RSA keys, X.509 certificates, Argon2 password hashes.
//! - **credentials**: Issuance, zip bundles, and the on-disk credential vault.
//! - **storage**: User records (JSON files or sled), sessions, signed PDFs.
//! - **auth**: The login verifier and session tokens.
//! - **service**: `CredentialService`, the facade the HTTP layer calls.
//! - **config**: Constants, storage layout, runtime configuration.
//! - **error**: The crate-level error taxonomy.
//!
//! ## Design Philosophy
//!
//! 1. Nothing touches disk at import time. Storage is created by
//!    `StorageLayout::initialize` when the service opens.
//! 2. Identifiers are claimed once. A second registration is a conflict.
//! 3. A failed login says "authentication failed" and nothing else. The real
//!    reason goes to logs and metrics.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod service;
pub mod storage;

pub use error::{FirmaError, FirmaResult};
pub use service::{CredentialService, Registration};
