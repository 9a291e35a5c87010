//! # Identifiers
//!
//! A Firma identifier is derived from personal attributes the same way the
//! Mexican RFC prefix is: the first two letters of the surname, the first
//! letter of the given name, and the birthdate as `YYMMDD`, uppercased.
//!
//! ```text
//! given = "Ana", surname = "Lopez", birthdate = 1995-03-10
//!     -> "LO" + "A" + "950310" -> "LOA950310"
//! ```
//!
//! It is deterministic and short, which makes it a convenient lookup key and
//! a terrible secret. Anyone who knows your name and birthday knows your
//! identifier. Security comes from the key and passphrase, never from this.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::BIRTHDATE_FORMAT;
use crate::error::ValidationError;

/// The primary key for every per-user artifact: records, credentials, documents.
///
/// Always uppercase and made only of alphanumeric characters, so it is safe
/// to use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize a user-supplied identifier (trim, uppercase).
    ///
    /// Returns `None` when the result is empty or contains anything other
    /// than alphanumeric characters. Login treats `None` as an unknown user.
    pub fn normalize(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() || !upper.chars().all(char::is_alphanumeric) {
            return None;
        }
        Some(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse an ISO-8601 birthdate (`YYYY-MM-DD`).
pub fn parse_birthdate(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), BIRTHDATE_FORMAT).map_err(|e| {
        ValidationError::new("birthdate", format!("expected YYYY-MM-DD ({e})"))
    })
}

/// Derive the identifier for a person.
///
/// # Errors
///
/// - `surname` has fewer than two characters after trimming.
/// - `given_name` is empty after trimming.
/// - either name contributes a character that is not alphabetic.
pub fn derive_identifier(
    given_name: &str,
    surname: &str,
    birthdate: NaiveDate,
) -> Result<Identifier, ValidationError> {
    let surname_prefix: String = surname.trim().chars().take(2).collect();
    if surname_prefix.chars().count() < 2 {
        return Err(ValidationError::new(
            "surname",
            "must have at least 2 characters",
        ));
    }

    let given_initial = given_name
        .trim()
        .chars()
        .next()
        .ok_or_else(|| ValidationError::new("given_name", "must not be empty"))?;

    if !surname_prefix.chars().all(char::is_alphabetic) {
        return Err(ValidationError::new(
            "surname",
            "must start with two letters",
        ));
    }
    if !given_initial.is_alphabetic() {
        return Err(ValidationError::new("given_name", "must start with a letter"));
    }

    let raw = format!(
        "{}{}{}",
        surname_prefix,
        given_initial,
        birthdate.format("%y%m%d")
    );
    Ok(Identifier(raw.to_uppercase()))
}

/// Convenience wrapper: parse the birthdate string, then derive.
pub fn derive_identifier_from_str(
    given_name: &str,
    surname: &str,
    birthdate: &str,
) -> Result<Identifier, ValidationError> {
    let date = parse_birthdate(birthdate)?;
    derive_identifier(given_name, surname, date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_reference_identifier() {
        let id = derive_identifier_from_str("Ana", "Lopez", "1995-03-10").unwrap();
        assert_eq!(id.as_str(), "LOA950310");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_identifier_from_str("maria", "garcia", "2001-12-31").unwrap();
        let b = derive_identifier_from_str("maria", "garcia", "2001-12-31").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GAM011231");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let id = derive_identifier_from_str("  ana ", " lopez", " 1995-03-10 ").unwrap();
        assert_eq!(id.as_str(), "LOA950310");
    }

    #[test]
    fn non_ascii_letters_are_uppercased() {
        let id = derive_identifier_from_str("íñigo", "ñuñez", "1980-01-02").unwrap();
        assert_eq!(id.as_str(), "ÑUÍ800102");
    }

    #[test]
    fn short_surname_is_rejected() {
        let err = derive_identifier_from_str("Ana", "L", "1995-03-10").unwrap_err();
        assert_eq!(err.field, "surname");
    }

    #[test]
    fn empty_given_name_is_rejected() {
        let err = derive_identifier_from_str("   ", "Lopez", "1995-03-10").unwrap_err();
        assert_eq!(err.field, "given_name");
    }

    #[test]
    fn digits_in_names_are_rejected() {
        assert!(derive_identifier_from_str("Ana", "1opez", "1995-03-10").is_err());
        assert!(derive_identifier_from_str("9na", "Lopez", "1995-03-10").is_err());
    }

    #[test]
    fn malformed_birthdates_are_rejected() {
        for bad in ["10/03/1995", "1995-02-30", "1995-13-01", "", "yesterday"] {
            let err = derive_identifier_from_str("Ana", "Lopez", bad).unwrap_err();
            assert_eq!(err.field, "birthdate", "input {bad:?}");
        }
    }

    #[test]
    fn leap_day_birthdate_is_accepted() {
        let id = derive_identifier_from_str("Ana", "Lopez", "2000-02-29").unwrap();
        assert_eq!(id.as_str(), "LOA000229");
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        let id = Identifier::normalize("  loa950310\n").unwrap();
        assert_eq!(id.as_str(), "LOA950310");
    }

    #[test]
    fn normalize_rejects_path_tricks() {
        assert!(Identifier::normalize("").is_none());
        assert!(Identifier::normalize("../etc").is_none());
        assert!(Identifier::normalize("LOA/950310").is_none());
        assert!(Identifier::normalize("LOA 950310").is_none());
    }
}
