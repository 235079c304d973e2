//! RSA key material per identity.
//!
//! A stored key always wins: once `{name}.key` exists it is loaded verbatim,
//! whatever key size the current invocation asks for.

use openssl::bn::BigNum;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use tracing::{debug, info};

use crate::error::{CertError, Result};
use crate::storage::{ArtifactKind, ArtifactStorage};

pub const RSA_PUBLIC_EXPONENT: u32 = 65537;
pub const MIN_KEY_SIZE: u32 = 1024;
pub const MAX_KEY_SIZE: u32 = 8192;
pub const DEFAULT_KEY_SIZE: u32 = 2048;

pub fn validate_key_size(bits: u32) -> Result<()> {
    if (MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&bits) {
        Ok(())
    } else {
        Err(CertError::InvalidConfiguration(format!(
            "{} is not a valid key size (expected {}..={})",
            bits, MIN_KEY_SIZE, MAX_KEY_SIZE
        )))
    }
}

/// Load the key of `identity`, or generate and persist a fresh one.
///
/// An existing but unreadable key file is an error, never regenerated.
pub fn ensure_key(
    storage: &ArtifactStorage,
    identity: &str,
    key_size: u32,
) -> Result<PKey<Private>> {
    let path = storage.artifact_path(identity, ArtifactKind::PrivateKey);
    if let Some(pem) = storage.read(&path)? {
        let key = PKey::private_key_from_pem(&pem).map_err(|e| CertError::key_load(&path, e))?;
        debug!("loaded key for `{}` from {}", identity, path.display());
        return Ok(key);
    }

    validate_key_size(key_size)?;
    let generation_error = |source| CertError::KeyGeneration {
        identity: identity.to_string(),
        bits: key_size,
        source,
    };
    let exponent = BigNum::from_u32(RSA_PUBLIC_EXPONENT).map_err(generation_error)?;
    let rsa = Rsa::generate_with_e(key_size, &exponent).map_err(generation_error)?;
    // traditional PKCS#1 encoding, unencrypted
    let pem = rsa.private_key_to_pem().map_err(generation_error)?;
    let key = PKey::from_rsa(rsa).map_err(generation_error)?;

    storage.write_atomic(&path, &pem, ArtifactKind::PrivateKey)?;
    info!(
        "generated {}-bit key for `{}` at {}",
        key_size,
        identity,
        path.display()
    );
    Ok(key)
}
