//! Error taxonomy for the credential lifecycle.
//!
//! Each module keeps its own error enum; [`FirmaError`] is what crosses the
//! crate boundary. The variants line up with the responses the HTTP layer
//! gives: validation → 400, conflict → 409, not found → 404, auth → 401,
//! crypto and storage → 500.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::credentials::bundle::BundleError;
use crate::crypto::CryptoError;
use crate::storage::documents::DocumentError;
use crate::storage::StoreError;

/// A registration field failed validation.
///
/// Carries the offending field name so callers can point the user at it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the input field, as it appears in the registration form.
    pub field: &'static str,
    /// Human-readable explanation.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Crate-level error returned by [`crate::service::CredentialService`].
#[derive(Debug, Error)]
pub enum FirmaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Key generation, signing, or serialization failed. Fatal for the request.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The identifier is already registered.
    #[error("identifier {0} is already registered")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Login failed. Displays the same generic message for every sub-kind.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Document storage rejected the request.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Bad configuration or storage layout that could not be created.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persistence failed for reasons unrelated to the request contents.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for FirmaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => FirmaError::Conflict(id),
            StoreError::NotFound(id) => FirmaError::NotFound(id),
            other => FirmaError::Storage(other.to_string()),
        }
    }
}

impl From<BundleError> for FirmaError {
    fn from(err: BundleError) -> Self {
        FirmaError::Storage(err.to_string())
    }
}

pub type FirmaResult<T> = Result<T, FirmaError>;
