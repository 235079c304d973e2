//! Artifact storage under the output directory.
//!
//! Every identity owns at most three files, `{name}.pem`, `{name}.key` and
//! `{name}.pfx`, where `name` is the sanitized primary name. The root
//! authority lives under the reserved name `ca`.
//!
//! Writes go through a temporary file in the same directory followed by an
//! atomic rename, and callers serialize work on one identity through
//! [`ArtifactStorage::with_identity_lock`].

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{CertError, Result};

/// Identity name of the root authority.
pub const CA_NAME: &str = "ca";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Certificate,
    PrivateKey,
    ExportBundle,
}

impl ArtifactKind {
    /// Canonical listing order for an identity.
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Certificate,
        ArtifactKind::PrivateKey,
        ArtifactKind::ExportBundle,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Certificate => "pem",
            ArtifactKind::PrivateKey => "key",
            ArtifactKind::ExportBundle => "pfx",
        }
    }

    /// Unix permission bits applied when the artifact is written.
    pub fn mode(self) -> u32 {
        match self {
            ArtifactKind::Certificate => 0o644,
            ArtifactKind::PrivateKey | ArtifactKind::ExportBundle => 0o600,
        }
    }
}

/// Map an identity name to a filename stem: anything outside
/// `[A-Za-z0-9.-]` becomes `_`.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct ArtifactStorage {
    output_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStorage {
    /// Open (and create if missing) the output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(|e| CertError::filesystem(&output_dir, e))?;
        Ok(ArtifactStorage {
            output_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, identity: &str, kind: ArtifactKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", safe_filename(identity), kind.extension()))
    }

    pub fn root_certificate_path(&self) -> PathBuf {
        self.artifact_path(CA_NAME, ArtifactKind::Certificate)
    }

    /// Canonical `{cert, key, pfx}` paths for `identity`, optionally
    /// restricted to files that exist and optionally preceded by the root
    /// certificate path.
    pub fn artifact_paths(
        &self,
        identity: &str,
        only_existing: bool,
        include_root: bool,
    ) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(4);
        if include_root {
            paths.push(self.root_certificate_path());
        }
        paths.extend(
            ArtifactKind::ALL
                .iter()
                .map(|kind| self.artifact_path(identity, *kind))
                .filter(|path| !only_existing || path.is_file()),
        );
        paths
    }

    /// Remove every existing artifact of `identity`. Missing files are
    /// skipped. Returns the paths that were actually removed.
    pub fn delete_artifacts(&self, identity: &str) -> Result<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        for path in self.artifact_paths(identity, false, false) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Deleting: {}", path.display());
                    deleted.push(path);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CertError::filesystem(&path, e)),
            }
        }
        Ok(deleted)
    }

    /// Read an artifact, `None` when it does not exist.
    pub fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CertError::filesystem(path, e)),
        }
    }

    /// Write `contents` to `path` through a temporary sibling file and an
    /// atomic rename, so readers never observe a partial artifact.
    pub fn write_atomic(&self, path: &Path, contents: &[u8], kind: ArtifactKind) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.output_dir);
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| CertError::filesystem(dir, e))?;
        temp.write_all(contents)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| CertError::filesystem(temp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(kind.mode()))
                .map_err(|e| CertError::filesystem(temp.path(), e))?;
        }
        #[cfg(not(unix))]
        let _ = kind;

        temp.persist(path)
            .map_err(|e| CertError::filesystem(path, e.error))?;
        debug!("wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    /// Run `f` while holding the lock of `identity`. Identities that sanitize
    /// to the same filename share one lock.
    ///
    /// The table only holds entries for identities that are currently locked
    /// or waited on.
    pub fn with_identity_lock<T>(&self, identity: &str, f: impl FnOnce() -> T) -> T {
        let key = safe_filename(identity);
        let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());

        let result = {
            let _guard = lock.lock();
            f()
        };

        // clones are only taken under the table lock, so a count of two
        // (table + ours) means nobody else holds or waits for this entry
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        result
    }
}
