//! # Self-Signed Certificates
//!
//! Each user gets an X.509 v3 certificate whose issuer is its own subject:
//!
//! ```text
//! Subject = Issuer = CN=<given> <surname>, emailAddress=<email>
//! Serial           = random 128-bit integer
//! Validity         = [issued_at, issued_at + 12 months]
//! Signature        = sha256WithRSAEncryption, by the subject's own key
//! Extensions       = basicConstraints CA:FALSE (critical)
//!                    keyUsage digitalSignature, nonRepudiation (critical)
//!                    subjectKeyIdentifier
//! ```
//!
//! There is no chain of trust. The certificate proves nothing on its own;
//! it only binds a public key to the claims so that login can check the key
//! a user presents against the certificate they present.

use chrono::{DateTime, Months, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509NameRef, X509};
use sha2::{Digest, Sha256};

use super::keys::{PublicKey, RsaKeypair};
use super::CryptoError;
use crate::config::{CERT_VALIDITY_MONTHS, SERIAL_NUMBER_BITS, X509_VERSION_3};
use crate::identity::IdentityClaims;

/// A parsed or freshly issued X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
}

impl Certificate {
    /// Issue a self-signed certificate for `claims`, valid from `issued_at`
    /// for exactly [`CERT_VALIDITY_MONTHS`] calendar months.
    ///
    /// `issued_at` is truncated to whole seconds, the resolution of ASN.1 time.
    pub fn self_signed(
        claims: &IdentityClaims,
        keypair: &RsaKeypair,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let build = |e: openssl::error::ErrorStack| CryptoError::CertificateBuild(e.to_string());

        let (not_before, not_after) = validity_window(issued_at)?;

        let mut builder = X509::builder().map_err(build)?;
        builder.set_version(X509_VERSION_3).map_err(build)?;

        let mut serial = BigNum::new().map_err(build)?;
        serial
            .rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)
            .map_err(build)?;
        let serial = serial.to_asn1_integer().map_err(build)?;
        builder.set_serial_number(&serial).map_err(build)?;

        let name = subject_name(claims)?;
        builder.set_subject_name(&name).map_err(build)?;
        builder.set_issuer_name(&name).map_err(build)?;

        let not_before = Asn1Time::from_unix(not_before.timestamp()).map_err(build)?;
        let not_after = Asn1Time::from_unix(not_after.timestamp()).map_err(build)?;
        builder.set_not_before(&not_before).map_err(build)?;
        builder.set_not_after(&not_after).map_err(build)?;

        builder.set_pubkey(keypair.pkey()).map_err(build)?;

        let basic_constraints = BasicConstraints::new().critical().build().map_err(build)?;
        builder.append_extension(basic_constraints).map_err(build)?;

        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .non_repudiation()
            .build()
            .map_err(build)?;
        builder.append_extension(key_usage).map_err(build)?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(build)?;
        builder.append_extension(ski).map_err(build)?;

        builder
            .sign(keypair.pkey(), MessageDigest::sha256())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;

        Ok(Self {
            x509: builder.build(),
        })
    }

    /// Parse a certificate from PEM, falling back to DER.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        let x509 = X509::from_pem(bytes)
            .or_else(|_| X509::from_der(bytes))
            .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
        Ok(Self { x509 })
    }

    pub fn to_pem(&self) -> Result<Vec<u8>, CryptoError> {
        self.x509.to_pem().map_err(CryptoError::serialization)
    }

    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.x509.to_der().map_err(CryptoError::serialization)
    }

    /// The public key embedded in the certificate body.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let pkey = self
            .x509
            .public_key()
            .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
        Ok(PublicKey::from_pkey(pkey))
    }

    pub fn common_name(&self) -> Option<String> {
        name_entry(self.x509.subject_name(), Nid::COMMONNAME)
    }

    pub fn email(&self) -> Option<String> {
        name_entry(self.x509.subject_name(), Nid::PKCS9_EMAILADDRESS)
    }

    /// True when issuer and subject carry the same entries.
    pub fn is_self_issued(&self) -> bool {
        name_entries(self.x509.issuer_name()) == name_entries(self.x509.subject_name())
    }

    /// Check the signature against the certificate's own public key.
    pub fn verify_self_signature(&self) -> Result<bool, CryptoError> {
        let pkey = self
            .x509
            .public_key()
            .map_err(|e| CryptoError::CertificateParse(e.to_string()))?;
        self.x509
            .verify(&pkey)
            .map_err(|e| CryptoError::CertificateParse(e.to_string()))
    }

    /// Serial number as uppercase hex.
    pub fn serial_hex(&self) -> Result<String, CryptoError> {
        let bn = self
            .x509
            .serial_number()
            .to_bn()
            .map_err(CryptoError::serialization)?;
        let hex = bn.to_hex_str().map_err(CryptoError::serialization)?;
        Ok(hex.to_string())
    }

    pub fn not_before(&self) -> Result<DateTime<Utc>, CryptoError> {
        asn1_to_utc(self.x509.not_before())
    }

    pub fn not_after(&self) -> Result<DateTime<Utc>, CryptoError> {
        asn1_to_utc(self.x509.not_after())
    }

    /// SHA-256 over the DER encoding, lowercase hex.
    pub fn fingerprint_sha256(&self) -> Result<String, CryptoError> {
        let der = self.to_der()?;
        Ok(hex::encode(Sha256::digest(&der)))
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name())
            .field("email", &self.email())
            .finish_non_exhaustive()
    }
}

/// `[issued_at, issued_at + 12 months]`, truncated to whole seconds.
///
/// Calendar arithmetic: Feb 29 rolls to Feb 28 of the next year, and a
/// window spanning a leap day is 366 days long.
pub fn validity_window(
    issued_at: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), CryptoError> {
    let not_before = DateTime::<Utc>::from_timestamp(issued_at.timestamp(), 0).ok_or_else(|| {
        CryptoError::CertificateBuild("issuance time out of range".to_string())
    })?;
    let not_after = not_before
        .checked_add_months(Months::new(CERT_VALIDITY_MONTHS))
        .ok_or_else(|| CryptoError::CertificateBuild("validity end out of range".to_string()))?;
    Ok((not_before, not_after))
}

fn subject_name(claims: &IdentityClaims) -> Result<X509Name, CryptoError> {
    let build = |e: openssl::error::ErrorStack| CryptoError::CertificateBuild(e.to_string());
    let mut name = X509Name::builder().map_err(build)?;
    name.append_entry_by_nid(Nid::COMMONNAME, &claims.common_name)
        .map_err(build)?;
    name.append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, &claims.email)
        .map_err(build)?;
    Ok(name.build())
}

fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
}

fn name_entries(name: &X509NameRef) -> Vec<(i32, Vec<u8>)> {
    name.entries()
        .map(|entry| (entry.object().nid().as_raw(), entry.data().as_slice().to_vec()))
        .collect()
}

/// ASN.1 time to UTC, measured as an offset from the Unix epoch.
fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, CryptoError> {
    let epoch = Asn1Time::from_unix(0).map_err(CryptoError::serialization)?;
    let diff = epoch.diff(time).map_err(CryptoError::serialization)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| CryptoError::CertificateParse("timestamp out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RSA_KEY_BITS;
    use chrono::TimeZone;

    fn claims() -> IdentityClaims {
        IdentityClaims::new("Ana", "Lopez", "ana@example.com")
    }

    fn issue_at(at: DateTime<Utc>) -> (RsaKeypair, Certificate) {
        let kp = RsaKeypair::generate(RSA_KEY_BITS).unwrap();
        let cert = Certificate::self_signed(&claims(), &kp, at).unwrap();
        (kp, cert)
    }

    #[test]
    fn certificate_embeds_the_keypair_public_key() {
        let (kp, cert) = issue_at(Utc::now());
        assert_eq!(cert.public_key().unwrap(), kp.public_key().unwrap());
    }

    #[test]
    fn certificate_is_self_signed_and_self_issued() {
        let (_, cert) = issue_at(Utc::now());
        assert!(cert.is_self_issued());
        assert!(cert.verify_self_signature().unwrap());
    }

    #[test]
    fn subject_carries_claims() {
        let (_, cert) = issue_at(Utc::now());
        assert_eq!(cert.common_name().as_deref(), Some("Ana Lopez"));
        assert_eq!(cert.email().as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn non_ascii_common_name_survives() {
        let kp = RsaKeypair::generate(RSA_KEY_BITS).unwrap();
        let claims = IdentityClaims::new("Íñigo", "Núñez", "inigo@example.com");
        let cert = Certificate::self_signed(&claims, &kp, Utc::now()).unwrap();
        assert_eq!(cert.common_name().as_deref(), Some("Íñigo Núñez"));
    }

    #[test]
    fn validity_is_one_calendar_year() {
        let issued = Utc.with_ymd_and_hms(2025, 3, 10, 12, 30, 45).unwrap();
        let (_, cert) = issue_at(issued);
        assert_eq!(cert.not_before().unwrap(), issued);
        assert_eq!(
            cert.not_after().unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 30, 45).unwrap()
        );
    }

    #[test]
    fn validity_spanning_leap_day_is_366_days() {
        let issued = Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).unwrap();
        let (nb, na) = validity_window(issued).unwrap();
        assert_eq!((na - nb).num_days(), 366);

        let issued = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let (nb, na) = validity_window(issued).unwrap();
        assert_eq!((na - nb).num_days(), 365);
    }

    #[test]
    fn leap_day_issuance_expires_on_feb_28() {
        let issued = Utc.with_ymd_and_hms(2028, 2, 29, 8, 0, 0).unwrap();
        let (_, na) = validity_window(issued).unwrap();
        assert_eq!(na, Utc.with_ymd_and_hms(2029, 2, 28, 8, 0, 0).unwrap());
    }

    #[test]
    fn sub_second_precision_is_truncated() {
        let issued = Utc.timestamp_opt(1_750_000_000, 987_654_321).unwrap();
        let (nb, _) = validity_window(issued).unwrap();
        assert_eq!(nb.timestamp(), 1_750_000_000);
        assert_eq!(nb.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn serial_numbers_differ_between_issuances() {
        let (_, a) = issue_at(Utc::now());
        let (_, b) = issue_at(Utc::now());
        assert_ne!(a.serial_hex().unwrap(), b.serial_hex().unwrap());
    }

    #[test]
    fn pem_and_der_parse_back_identically() {
        let (_, cert) = issue_at(Utc::now());
        let from_pem = Certificate::parse(&cert.to_pem().unwrap()).unwrap();
        let from_der = Certificate::parse(&cert.to_der().unwrap()).unwrap();
        assert_eq!(
            from_pem.fingerprint_sha256().unwrap(),
            cert.fingerprint_sha256().unwrap()
        );
        assert_eq!(
            from_der.fingerprint_sha256().unwrap(),
            cert.fingerprint_sha256().unwrap()
        );
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(Certificate::parse(b"definitely not a certificate").is_err());
        assert!(Certificate::parse(&[]).is_err());
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let (_, cert) = issue_at(Utc::now());
        let fp = cert.fingerprint_sha256().unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
