//! Idempotent end-entity issuance.
//!
//! Per identity the artifact set moves through a small state machine:
//!
//! ```text
//! Absent --issue--> Issued --issue--> Issued (cache hit, nothing rewritten)
//! Issued --rotate--> Absent --issue--> Issued (new key, new serial, same CA)
//! ```
//!
//! The presence of `{name}.pem` is the only idempotency signal. A cached
//! certificate is returned as-is even when the requested names differ from
//! the SAN set it carries; changing a server's names requires rotation.

use std::path::Path;

use openssl::x509::X509;
use secrecy::SecretString;
use tracing::{debug, info};

use crate::error::{CertError, Result};
use crate::generate_end_entity::{EndEntityUsage, RsaEndEntityBuilder};
use crate::generate_root_ca::RootAuthority;
use crate::pfx_key::{build_export_bundle, DEFAULT_KDF_ROUNDS};
use crate::storage::{safe_filename, ArtifactKind, ArtifactStorage, CA_NAME};
use crate::store_key::{ensure_key, DEFAULT_KEY_SIZE};

/// Issuance parameters shared by every identity of one process.
#[derive(Debug)]
pub struct IssuanceSettings {
    pub key_size: u32,
    pub kdf_rounds: u32,
    pub password: SecretString,
}

impl Default for IssuanceSettings {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            kdf_rounds: DEFAULT_KDF_ROUNDS,
            password: SecretString::new("password".to_string()),
        }
    }
}

/// Result of one issuance call.
#[derive(Debug)]
pub struct IssuedIdentity {
    /// Sanitized primary name, the artifact filename stem.
    pub identity: String,
    pub certificate: X509,
    /// `false` when the certificate was served from disk.
    pub newly_issued: bool,
}

/// Everything issuance needs, built once at startup and shared read-only.
pub struct IssuanceContext {
    settings: IssuanceSettings,
    storage: ArtifactStorage,
    root: RootAuthority,
}

impl IssuanceContext {
    /// Open the output directory and load or create the root authority.
    pub fn bootstrap(settings: IssuanceSettings, output_dir: &Path) -> Result<Self> {
        let storage = ArtifactStorage::new(output_dir)?;
        let root = RootAuthority::ensure(&storage, settings.key_size)?;
        Ok(Self {
            settings,
            storage,
            root,
        })
    }

    pub fn settings(&self) -> &IssuanceSettings {
        &self.settings
    }

    pub fn storage(&self) -> &ArtifactStorage {
        &self.storage
    }

    pub fn root(&self) -> &RootAuthority {
        &self.root
    }

    /// Issue (or reuse) the certificate for `names`; `names[0]` is the CN and
    /// the artifact name.
    pub fn ensure_leaf(&self, names: &[String], usage: EndEntityUsage) -> Result<IssuedIdentity> {
        self.issue(names, usage, false)
    }

    /// Like [`ensure_leaf`](Self::ensure_leaf), deleting the identity's
    /// existing artifacts first when `rotate` is set. Deletion and issuance
    /// happen under the identity lock.
    pub fn issue(
        &self,
        names: &[String],
        usage: EndEntityUsage,
        rotate: bool,
    ) -> Result<IssuedIdentity> {
        self.issue_then(names, usage, rotate, Ok)
    }

    /// Issue like [`issue`](Self::issue) and hand the result to `then` before
    /// the identity lock is released. Anything `then` reads from the
    /// identity's artifacts cannot be touched by a concurrent rotation.
    pub fn issue_then<T>(
        &self,
        names: &[String],
        usage: EndEntityUsage,
        rotate: bool,
        then: impl FnOnce(IssuedIdentity) -> Result<T>,
    ) -> Result<T> {
        let primary = names
            .first()
            .ok_or_else(|| CertError::InvalidRequest("empty name list".to_string()))?;
        if primary.is_empty() {
            return Err(CertError::InvalidRequest("empty primary name".to_string()));
        }
        if usage == EndEntityUsage::Client && safe_filename(primary) == CA_NAME {
            return Err(CertError::ReservedIdentity(primary.clone()));
        }

        self.storage.with_identity_lock(primary, || {
            if rotate {
                let deleted = self.storage.delete_artifacts(primary)?;
                info!("rotating `{}`: removed {} artifact(s)", primary, deleted.len());
            }
            let issued = self.issue_locked(primary, names, usage)?;
            then(issued)
        })
    }

    fn issue_locked(
        &self,
        primary: &str,
        names: &[String],
        usage: EndEntityUsage,
    ) -> Result<IssuedIdentity> {
        let key = ensure_key(&self.storage, primary, self.settings.key_size)?;
        let cert_path = self.storage.artifact_path(primary, ArtifactKind::Certificate);

        let (certificate, newly_issued) = match self.storage.read(&cert_path)? {
            Some(pem) => {
                let certificate =
                    X509::from_pem(&pem).map_err(|e| CertError::cert_load(&cert_path, e))?;
                debug!("`{}` served from {}", primary, cert_path.display());
                (certificate, false)
            }
            None => {
                let certificate = RsaEndEntityBuilder::new(self.root.key(), self.root.certificate())
                    .names(names)
                    .usage(usage)
                    .build(&key)
                    .map_err(|e| CertError::signing(primary, e))?;
                let pem = certificate
                    .to_pem()
                    .map_err(|e| CertError::signing(primary, e))?;
                self.storage
                    .write_atomic(&cert_path, &pem, ArtifactKind::Certificate)?;
                info!(
                    "issued {:?} certificate for `{}` ({} name(s))",
                    usage,
                    primary,
                    names.len()
                );
                (certificate, true)
            }
        };

        // The bundle is rebuilt on every client call, cache hit or not.
        if usage == EndEntityUsage::Client {
            let bundle = build_export_bundle(
                primary,
                &key,
                &certificate,
                &self.settings.password,
                self.settings.kdf_rounds,
            )
            .map_err(|source| CertError::Bundle {
                identity: primary.to_string(),
                source,
            })?;
            let pfx_path = self.storage.artifact_path(primary, ArtifactKind::ExportBundle);
            self.storage
                .write_atomic(&pfx_path, &bundle, ArtifactKind::ExportBundle)?;
            debug!("wrote export bundle {}", pfx_path.display());
        }

        Ok(IssuedIdentity {
            identity: safe_filename(primary),
            certificate,
            newly_issued,
        })
    }
}
