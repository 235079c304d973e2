//! QuickCert - Local Certificate Authority Library
//!
//! A small self-hosted CA that issues RSA server and client certificates
//! signed by one self-signed root, and keeps every artifact as plain files in
//! a single output directory.
//!
//! # Overview
//!
//! ```text
//! QuickCert CA (self-signed, CA=true, keyCertSign + cRLSign)
//!   ├── Server certificate (CA=false, serverAuth, SAN = DNS/IP names)
//!   └── Client certificate (CA=false, clientAuth, plus a PKCS#12 .pfx)
//! ```
//!
//! Artifacts are named after the sanitized primary name of an identity:
//!
//! | File          | Contents                              | Mode   |
//! |---------------|---------------------------------------|--------|
//! | `{name}.pem`  | X.509 certificate (PEM)               | `0644` |
//! | `{name}.key`  | RSA private key (PKCS#1 PEM)          | `0600` |
//! | `{name}.pfx`  | key + certificate (clients only)      | `0600` |
//!
//! The root authority uses the reserved identity `ca`.
//!
//! # Issuance rules
//!
//! - Existing artifacts are reused: a second request for the same identity
//!   returns the certificate on disk and never regenerates the key.
//! - Rotation deletes the identity's artifacts before issuing again.
//! - All writes go to a temporary file in the output directory and are
//!   renamed into place, so readers never observe a partial file.
//! - Requests for the same identity are serialized; different identities
//!   proceed in parallel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quickcert::issuance::{IssuanceContext, IssuanceSettings};
//! use quickcert::protocol::Protocol;
//!
//! fn main() -> quickcert::error::Result<()> {
//!     let context = IssuanceContext::bootstrap(IssuanceSettings::default(), "certs".as_ref())?;
//!     let protocol = Protocol::new(Arc::new(context));
//!
//!     let servers = vec![vec!["example.com".to_string(), "192.0.2.1".to_string()]];
//!     let report = protocol.run_batch(&servers, &["alice".to_string()]);
//!     assert!(report.is_success());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`configs`]: command line and TOML configuration
//! - [`storage`]: artifact paths, atomic writes, per-identity locks
//! - [`store_key`]: load-or-generate RSA keys
//! - [`generate_root_ca`]: the self-signed root authority
//! - [`generate_end_entity`]: server and client certificate builder
//! - [`pfx_key`]: PKCS#12 export bundles
//! - [`issuance`]: the idempotent issuance engine
//! - [`protocol`]: typed requests and the batch driver
//! - [`archive`]: zip archives for network callers
//! - [`webserver`]: the HTTP surface

pub mod archive;
pub mod configs;
pub mod error;
pub mod generate_end_entity;
pub mod generate_root_ca;
pub mod issuance;
pub mod pfx_key;
pub mod protocol;
pub mod storage;
pub mod store_key;
pub mod webserver;
pub mod x509_fields;
