//! Error taxonomy for issuance operations.
//!
//! Every failure is reported to the immediate caller; nothing in the crate
//! retries or silently regenerates material it could not read.

use std::path::{Path, PathBuf};

use openssl::error::ErrorStack;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CertError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CertError {
    /// Rejected before any I/O; the process does not start.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("identity `{0}` is reserved for the certificate authority")]
    ReservedIdentity(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to load private key from {}: {source}", path.display())]
    KeyLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to load certificate from {}: {source}", path.display())]
    CertLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to generate {bits}-bit RSA key for `{identity}`: {source}")]
    KeyGeneration {
        identity: String,
        bits: u32,
        #[source]
        source: ErrorStack,
    },

    #[error("failed to sign certificate for `{identity}`: {source}")]
    Signing {
        identity: String,
        #[source]
        source: ErrorStack,
    },

    #[error("failed to build export bundle for `{identity}`: {source}")]
    Bundle {
        identity: String,
        #[source]
        source: ErrorStack,
    },

    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to assemble archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl CertError {
    pub(crate) fn filesystem(path: &Path, source: std::io::Error) -> Self {
        CertError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn key_load(path: &Path, source: impl Into<BoxError>) -> Self {
        CertError::KeyLoad {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub(crate) fn cert_load(path: &Path, source: impl Into<BoxError>) -> Self {
        CertError::CertLoad {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub(crate) fn signing(identity: &str, source: ErrorStack) -> Self {
        CertError::Signing {
            identity: identity.to_string(),
            source,
        }
    }
}
