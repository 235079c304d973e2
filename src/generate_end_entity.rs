//! End-entity certificate generation
//!
//! Leaf certificates are signed directly by the root authority:
//!
//! ```text
//! Root CA (self-signed)
//!   └── End-entity certificate (server or client) ← This module
//! ```
//!
//! # X.509 Extensions
//! - **Basic Constraints**: CA=false, critical
//! - **Key Usage**: `digitalSignature`, `keyEncipherment`, critical
//! - **Extended Key Usage**: `serverAuth` or `clientAuth`
//! - **Authority / Subject Key Identifier**
//! - **Subject Alternative Name** (servers only): every requested name in
//!   request order, IP literals as `IP`, everything else as `DNS`

use std::net::IpAddr;

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509Ref, X509};

use crate::x509_fields::{random_serial, set_validity, VALIDITY_DAYS, X509_VERSION_3};

/// What the certificate may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndEntityUsage {
    Server,
    Client,
}

/// A single Subject Alternative Name entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

impl AltName {
    /// Names that parse as a numeric IPv4/IPv6 address become `Ip`; anything
    /// else is a DNS name. Never fails.
    pub fn classify(name: &str) -> Self {
        match name.parse::<IpAddr>() {
            Ok(ip) => AltName::Ip(ip),
            Err(_) => AltName::Dns(name.to_string()),
        }
    }
}

// ================= RSA End-Entity Builder =================

/// Builder for leaf certificates over an existing subject key.
///
/// The first name is the subject CN; for servers the whole list becomes the
/// SAN extension.
pub struct RsaEndEntityBuilder<'a> {
    names: Vec<String>,
    usage: EndEntityUsage,
    validity_days: u32,
    signing_key: &'a PKey<Private>,
    signing_cert: &'a X509,
}

impl<'a> RsaEndEntityBuilder<'a> {
    pub fn new(signing_key: &'a PKey<Private>, signing_cert: &'a X509) -> Self {
        Self {
            names: Vec::new(),
            usage: EndEntityUsage::Server,
            validity_days: VALIDITY_DAYS,
            signing_key,
            signing_cert,
        }
    }

    pub fn names(mut self, names: &[String]) -> Self {
        self.names = names.to_vec();
        self
    }

    pub fn usage(mut self, usage: EndEntityUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Sign a certificate for `subject_key`.
    ///
    /// `names` must not be empty; the issuance engine guarantees this.
    pub fn build(&self, subject_key: &PKey<Private>) -> Result<X509, ErrorStack> {
        let common_name = self.names.first().map(String::as_str).unwrap_or_default();
        let issuer: &X509Ref = self.signing_cert;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;

        let mut name_builder = X509Name::builder()?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
        let subject_name = name_builder.build();
        builder.set_subject_name(&subject_name)?;
        builder.set_issuer_name(issuer.subject_name())?;

        set_validity(&mut builder, self.validity_days)?;
        builder.set_pubkey(subject_key)?;

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;

        let mut eku = ExtendedKeyUsage::new();
        match self.usage {
            EndEntityUsage::Server => eku.server_auth(),
            EndEntityUsage::Client => eku.client_auth(),
        };
        builder.append_extension(eku.build()?)?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(issuer), None))?;
        builder.append_extension(aki)?;
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(issuer), None))?;
        builder.append_extension(ski)?;

        if self.usage == EndEntityUsage::Server {
            let mut san = SubjectAlternativeName::new();
            for name in &self.names {
                match AltName::classify(name) {
                    AltName::Ip(ip) => san.ip(&ip.to_string()),
                    AltName::Dns(dns) => san.dns(&dns),
                };
            }
            let san = san.build(&builder.x509v3_context(Some(issuer), None))?;
            builder.append_extension(san)?;
        }

        builder.sign(self.signing_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}
