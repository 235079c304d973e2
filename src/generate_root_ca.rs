//! Root CA bootstrap
//!
//! The root authority is the single trust anchor of an output directory:
//! `ca.key` and `ca.pem`. Both are created on first start and reused verbatim
//! afterwards; a loaded `ca.pem` is trusted as-is, without checking that it
//! was signed by `ca.key`.
//!
//! # Certificate Properties
//! - **Subject / Issuer**: `CN=QuickCert CA, O=QuickCert, OU=QuickCert tool`
//! - **Basic Constraints**: CA=true, no path length limit, critical
//! - **Key Usage**: keyCertSign, cRLSign, critical
//! - **Subject Key Identifier**: non-critical
//! - **Validity**: one day backdated, ten years forward
//! - **Signature**: SHA-256 with RSA

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509};
use tracing::info;

use crate::error::{CertError, Result};
use crate::storage::{ArtifactKind, ArtifactStorage, CA_NAME};
use crate::store_key::ensure_key;
use crate::x509_fields::{random_serial, set_validity, VALIDITY_DAYS, X509_VERSION_3};

pub const ROOT_CA_COMMON_NAME: &str = "QuickCert CA";
pub const ROOT_CA_ORGANIZATION: &str = "QuickCert";
pub const ROOT_CA_ORGANIZATIONAL_UNIT: &str = "QuickCert tool";

// ================= RSA Root CA Builder =================

/// Builder for the self-signed root certificate over an existing key.
pub(crate) struct RsaRootCABuilder {
    subject_common_name: String,
    organization: String,
    organizational_unit: String,
    validity_days: u32,
}

impl RsaRootCABuilder {
    pub(crate) fn new() -> Self {
        Self {
            subject_common_name: ROOT_CA_COMMON_NAME.to_string(),
            organization: ROOT_CA_ORGANIZATION.to_string(),
            organizational_unit: ROOT_CA_ORGANIZATIONAL_UNIT.to_string(),
            validity_days: VALIDITY_DAYS,
        }
    }

    #[cfg(test)]
    pub(crate) fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Self-sign a CA certificate for `private_key`.
    pub(crate) fn build(self, private_key: &PKey<Private>) -> std::result::Result<X509, ErrorStack> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name_builder = X509Name::builder()?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, &self.subject_common_name)?;
        name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)?;
        name_builder
            .append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit)?;
        let name = name_builder.build();

        // self-signed: subject and issuer are identical
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        set_validity(&mut builder, self.validity_days)?;
        builder.set_pubkey(private_key)?;

        // no pathlen: the root may sign any depth
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;

        builder.sign(private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

/// The loaded or freshly created trust anchor, read-only for the lifetime of
/// the process.
pub struct RootAuthority {
    key: PKey<Private>,
    certificate: X509,
}

impl RootAuthority {
    /// Load `ca.key` / `ca.pem`, creating whichever is missing.
    pub fn ensure(storage: &ArtifactStorage, key_size: u32) -> Result<Self> {
        storage.with_identity_lock(CA_NAME, || {
            let key = ensure_key(storage, CA_NAME, key_size)?;
            let path = storage.root_certificate_path();

            let certificate = match storage.read(&path)? {
                Some(pem) => {
                    let certificate =
                        X509::from_pem(&pem).map_err(|e| CertError::cert_load(&path, e))?;
                    info!("loaded root certificate from {}", path.display());
                    certificate
                }
                None => {
                    let certificate = RsaRootCABuilder::new()
                        .build(&key)
                        .map_err(|e| CertError::signing(CA_NAME, e))?;
                    let pem = certificate
                        .to_pem()
                        .map_err(|e| CertError::signing(CA_NAME, e))?;
                    storage.write_atomic(&path, &pem, ArtifactKind::Certificate)?;
                    info!("created root certificate at {}", path.display());
                    certificate
                }
            };

            Ok(RootAuthority { key, certificate })
        })
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_name(cert: &X509) -> String {
        let entry = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap();
        String::from_utf8_lossy(entry.data().as_slice()).into_owned()
    }

    fn assert_within_minute(diff: &openssl::asn1::TimeDiff, days: u32) {
        let secs = -(i64::from(diff.days) * 86_400 + i64::from(diff.secs));
        assert!((secs - i64::from(days) * 86_400).abs() < 60);
    }

    #[test]
    fn test_root_certificate_is_ca_and_self_signed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArtifactStorage::new(dir.path()).unwrap();
        let root = RootAuthority::ensure(&storage, 1024).unwrap();
        let cert = root.certificate();

        assert_eq!(common_name(cert), ROOT_CA_COMMON_NAME);
        assert_eq!(
            cert.subject_name().to_der().unwrap(),
            cert.issuer_name().to_der().unwrap()
        );
        assert!(cert.verify(root.key()).unwrap());
        assert!(cert.subject_key_id().is_some());

        let text = String::from_utf8(cert.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:TRUE"));
        assert!(!text.contains("pathlen"));
        assert!(text.contains("Certificate Sign, CRL Sign"));
        assert!(!text.contains("Digital Signature"));
    }

    #[test]
    fn test_root_validity_is_backdated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArtifactStorage::new(dir.path()).unwrap();
        let root = RootAuthority::ensure(&storage, 1024).unwrap();

        let now = openssl::asn1::Asn1Time::days_from_now(0).unwrap();
        let diff = root.certificate().not_before().diff(&now).unwrap();
        assert_eq!(diff.days, 1);

        let end = root.certificate().not_after().diff(&now).unwrap();
        assert_within_minute(&end, VALIDITY_DAYS);
    }

    #[test]
    fn test_root_is_reused_on_second_start() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArtifactStorage::new(dir.path()).unwrap();
        RootAuthority::ensure(&storage, 1024).unwrap();
        let pem = std::fs::read(dir.path().join("ca.pem")).unwrap();
        let key = std::fs::read(dir.path().join("ca.key")).unwrap();

        let again = RootAuthority::ensure(&storage, 2048).unwrap();
        assert_eq!(std::fs::read(dir.path().join("ca.pem")).unwrap(), pem);
        assert_eq!(std::fs::read(dir.path().join("ca.key")).unwrap(), key);
        assert_eq!(again.key().bits(), 1024);
    }

    #[test]
    fn test_corrupt_root_certificate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArtifactStorage::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("ca.pem"), b"garbage").unwrap();

        let err = RootAuthority::ensure(&storage, 1024).err().unwrap();
        assert!(matches!(err, CertError::CertLoad { .. }));
    }

    #[test]
    fn test_builder_honours_validity_override() {
        let key = PKey::from_rsa(openssl::rsa::Rsa::generate(1024).unwrap()).unwrap();
        let cert = RsaRootCABuilder::new().validity_days(30).build(&key).unwrap();

        let now = openssl::asn1::Asn1Time::days_from_now(0).unwrap();
        let end = cert.not_after().diff(&now).unwrap();
        assert_within_minute(&end, 30);
    }
}
