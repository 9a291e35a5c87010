//! # Credentials Module
//!
//! Issuing, packaging, and keeping the artifacts a user authenticates with.
//!
//! ```text
//! issuer.rs  - keypair + self-signed certificate + encrypted key blob
//! bundle.rs  - zip packaging of key and certificate
//! vault.rs   - per-identifier directory of issued artifacts
//! ```

pub mod bundle;
pub mod issuer;
pub mod vault;

pub use bundle::{bundle, extract, BundleError};
pub use issuer::{issue, CredentialIssuer, IssuedCredentials};
pub use vault::{CredentialArtifact, CredentialVault, StagedCredentials, StoredCredentials};
