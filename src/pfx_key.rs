//! Password-protected PKCS#12 export bundles for client identities.
//!
//! Bundles use the legacy-compatible parameters most clients still expect:
//! PBE-SHA1-3DES for key and certificate bags and an HMAC-SHA1 MAC, both with
//! the configured iteration count.

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_KDF_ROUNDS: u32 = 50_000;

/// Encode `key` and `certificate` as a DER PKCS#12 container named
/// `friendly_name`.
pub fn build_export_bundle(
    friendly_name: &str,
    key: &PKey<Private>,
    certificate: &X509,
    password: &SecretString,
    kdf_rounds: u32,
) -> Result<Vec<u8>, ErrorStack> {
    let pkcs12 = Pkcs12::builder()
        .name(friendly_name)
        .pkey(key)
        .cert(certificate)
        .key_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
        .cert_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
        .key_iter(kdf_rounds)
        .mac_iter(kdf_rounds)
        .mac_md(MessageDigest::sha1())
        .build2(password.expose_secret())?;
    pkcs12.to_der()
}
