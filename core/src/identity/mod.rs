//! # Identity Module
//!
//! Who a user is, as far as Firma cares:
//!
//! 1. **Identifier**: a short code derived from name, surname and birthdate.
//!    It keys every per-user artifact on disk.
//! 2. **Claims**: the common name and email bound into the certificate.
//!
//! Neither is secret. The identifier in particular is guessable from public
//! data and must never be treated as a credential on its own.

pub mod claims;
pub mod identifier;

pub use claims::{IdentityClaims, RegistrationRequest, ValidatedRegistration};
pub use identifier::{derive_identifier, derive_identifier_from_str, Identifier};
