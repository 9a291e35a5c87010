//! Registration input and the identity claims bound into certificates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::identifier::{derive_identifier, parse_birthdate, Identifier};
use crate::config::MIN_PASSPHRASE_LENGTH;
use crate::error::ValidationError;

/// Subject claims written into the certificate's subject (and issuer) name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// `"<given> <surname>"`.
    pub common_name: String,
    pub email: String,
}

impl IdentityClaims {
    pub fn new(given_name: &str, surname: &str, email: &str) -> Self {
        Self {
            common_name: format!("{} {}", given_name.trim(), surname.trim()),
            email: email.trim().to_string(),
        }
    }
}

/// Raw registration form, as received from the HTTP layer.
#[derive(Clone, Deserialize)]
pub struct RegistrationRequest {
    pub given_name: String,
    pub surname: String,
    /// ISO-8601 date, `YYYY-MM-DD`.
    pub birthdate: String,
    pub email: String,
    pub passphrase: String,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("given_name", &self.given_name)
            .field("surname", &self.surname)
            .field("birthdate", &self.birthdate)
            .field("email", &self.email)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// A registration request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    pub identifier: Identifier,
    pub given_name: String,
    pub surname: String,
    pub birthdate: NaiveDate,
    pub claims: IdentityClaims,
}

impl RegistrationRequest {
    /// Validate every field and derive the identifier.
    ///
    /// The first failing field is reported.
    pub fn validate(&self) -> Result<ValidatedRegistration, ValidationError> {
        let birthdate = parse_birthdate(&self.birthdate)?;
        let identifier = derive_identifier(&self.given_name, &self.surname, birthdate)?;
        validate_email(&self.email)?;
        validate_passphrase(&self.passphrase)?;

        Ok(ValidatedRegistration {
            identifier,
            given_name: self.given_name.trim().to_string(),
            surname: self.surname.trim().to_string(),
            birthdate,
            claims: IdentityClaims::new(&self.given_name, &self.surname, &self.email),
        })
    }
}

/// Minimal structural check: one `@`, non-empty local part, dotted domain.
/// ASCII only, since the address lands in a PKCS#9 `emailAddress` (IA5String).
pub fn validate_email(raw: &str) -> Result<(), ValidationError> {
    let email = raw.trim();
    let invalid = || ValidationError::new("email", "must look like name@example.com");

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !email.is_ascii()
        || email.chars().any(|c| c.is_ascii_whitespace())
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_passphrase(passphrase: &str) -> Result<(), ValidationError> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LENGTH {
        return Err(ValidationError::new(
            "passphrase",
            format!("must have at least {MIN_PASSPHRASE_LENGTH} characters"),
        ));
    }
    Ok(())
}
