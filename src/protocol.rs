//! Protocol Module
//!
//! Typed requests over the issuance engine and the batch driver. Both the
//! command line and the HTTP surface go through [`Protocol`].

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{error, info};

use crate::archive::zip_files;
use crate::error::{CertError, Result};
use crate::generate_end_entity::EndEntityUsage;
use crate::issuance::{IssuanceContext, IssuedIdentity};
use crate::storage::{safe_filename, CA_NAME};

/// Archive name of the root certificate bundle.
pub const ROOT_ARCHIVE_NAME: &str = "ca-cert.zip";

/// Parsed name list plus rotation flag of an issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub names: Vec<String>,
    pub rotate: bool,
}

impl IssueRequest {
    /// Parse a comma separated name list. Surrounding whitespace is trimmed
    /// and empty entries are dropped.
    pub fn parse(names: &str, rotate: bool) -> Self {
        let names = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Self { names, rotate }
    }
}

/// Requests accepted from network callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RootBundle,
    IssueClient(IssueRequest),
    /// `peer` is the caller's observed address; it is prepended to the name
    /// list and therefore becomes the CN.
    IssueServer { peer: IpAddr, request: IssueRequest },
}

/// Zip archive handed back to the caller. It holds the root certificate
/// followed by the identity's existing artifacts, read under the identity
/// lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactArchive {
    pub archive_name: String,
    pub body: Vec<u8>,
}

/// Outcome of a batch run: one entry per attempted identity.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub issued: Vec<String>,
    pub failed: Vec<(String, CertError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Protocol {
    context: Arc<IssuanceContext>,
}

impl Protocol {
    pub fn new(context: Arc<IssuanceContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &IssuanceContext {
        &self.context
    }

    pub fn process_request(&self, request: Request) -> Result<ArtifactArchive> {
        let storage = self.context.storage();
        match request {
            Request::RootBundle => storage.with_identity_lock(CA_NAME, || -> Result<ArtifactArchive> {
                Ok(ArtifactArchive {
                    archive_name: ROOT_ARCHIVE_NAME.to_string(),
                    body: zip_files(&[storage.root_certificate_path()])?,
                })
            }),
            Request::IssueClient(request) => {
                // clients carry no SAN: only the primary name matters
                let primary = request
                    .names
                    .first()
                    .cloned()
                    .ok_or_else(|| CertError::InvalidRequest("no client name given".to_string()))?;
                self.context.issue_then(
                    std::slice::from_ref(&primary),
                    EndEntityUsage::Client,
                    request.rotate,
                    |issued| self.archive_for(&issued),
                )
            }
            Request::IssueServer { peer, request } => {
                let mut names = Vec::with_capacity(request.names.len() + 1);
                names.push(peer.to_string());
                names.extend(request.names);
                self.context.issue_then(
                    &names,
                    EndEntityUsage::Server,
                    request.rotate,
                    |issued| self.archive_for(&issued),
                )
            }
        }
    }

    /// Must run under the identity lock of `issued`.
    fn archive_for(&self, issued: &IssuedIdentity) -> Result<ArtifactArchive> {
        let files = self
            .context
            .storage()
            .artifact_paths(&issued.identity, true, true);
        Ok(ArtifactArchive {
            archive_name: format!("{}.zip", safe_filename(&issued.identity)),
            body: zip_files(&files)?,
        })
    }

    /// Issue every server name-group, then every client name. A failure is
    /// logged and recorded; the remaining entries are still attempted.
    pub fn run_batch(&self, server_groups: &[Vec<String>], clients: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        let jobs = server_groups
            .iter()
            .map(|group| (group.clone(), EndEntityUsage::Server))
            .chain(
                clients
                    .iter()
                    .map(|client| (vec![client.clone()], EndEntityUsage::Client)),
            );

        for (names, usage) in jobs {
            let label = names.first().cloned().unwrap_or_default();
            match self.context.ensure_leaf(&names, usage) {
                Ok(issued) => {
                    info!(
                        "{:?} identity `{}` ready ({})",
                        usage,
                        label,
                        if issued.newly_issued { "issued" } else { "cached" }
                    );
                    report.issued.push(label);
                }
                Err(e) => {
                    error!("failed to issue {:?} identity `{}`: {}", usage, label, e);
                    report.failed.push((label, e));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::IssuanceSettings;
    use openssl::pkey::PKey;
    use openssl::x509::X509;
    use secrecy::SecretString;
    use std::io::{Cursor, Read};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn protocol() -> (TempDir, Protocol) {
        let dir = tempfile::tempdir().unwrap();
        let settings = IssuanceSettings {
            key_size: 1024,
            kdf_rounds: 1000,
            password: SecretString::new("password".to_string()),
        };
        let context = IssuanceContext::bootstrap(settings, dir.path()).unwrap();
        (dir, Protocol::new(Arc::new(context)))
    }

    fn file_names(archive: &ArtifactArchive) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive.body.as_slice())).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn entry(zip: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Vec<u8> {
        let mut contents = Vec::new();
        zip.by_name(name)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        contents
    }

    #[test]
    fn test_parse_issue_request() {
        let request = IssueRequest::parse(" web.local , 10.0.0.5,,", true);
        assert_eq!(request.names, vec!["web.local", "10.0.0.5"]);
        assert!(request.rotate);
        assert!(IssueRequest::parse(",", false).names.is_empty());
    }

    #[test]
    fn test_root_bundle_contains_only_root() {
        let (_dir, protocol) = protocol();
        let bundle = protocol.process_request(Request::RootBundle).unwrap();
        assert_eq!(bundle.archive_name, "ca-cert.zip");
        assert_eq!(file_names(&bundle), vec!["ca.pem"]);
    }

    #[test]
    fn test_client_request_returns_full_set() {
        let (_dir, protocol) = protocol();
        let bundle = protocol
            .process_request(Request::IssueClient(IssueRequest::parse("alice,extra", false)))
            .unwrap();
        assert_eq!(bundle.archive_name, "alice.zip");
        assert_eq!(
            file_names(&bundle),
            vec!["ca.pem", "alice.pem", "alice.key", "alice.pfx"]
        );
    }

    #[test]
    fn test_client_request_for_ca_is_rejected() {
        let (dir, protocol) = protocol();
        let err = protocol
            .process_request(Request::IssueClient(IssueRequest::parse("ca", true)))
            .unwrap_err();
        assert!(matches!(err, CertError::ReservedIdentity(_)));
        assert!(dir.path().join("ca.key").exists());
        assert!(!dir.path().join("ca.pfx").exists());
    }

    #[test]
    fn test_empty_client_request_is_invalid() {
        let (_dir, protocol) = protocol();
        let err = protocol
            .process_request(Request::IssueClient(IssueRequest::parse(" ", false)))
            .unwrap_err();
        assert!(matches!(err, CertError::InvalidRequest(_)));
    }

    #[test]
    fn test_server_request_prepends_peer_address() {
        let (dir, protocol) = protocol();
        let peer = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));
        let bundle = protocol
            .process_request(Request::IssueServer {
                peer,
                request: IssueRequest::parse("app.example", false),
            })
            .unwrap();

        assert_eq!(bundle.archive_name, "192.0.2.7.zip");
        assert_eq!(
            file_names(&bundle),
            vec!["ca.pem", "192.0.2.7.pem", "192.0.2.7.key"]
        );

        let pem = std::fs::read(dir.path().join("192.0.2.7.pem")).unwrap();
        let cert = openssl::x509::X509::from_pem(&pem).unwrap();
        let sans = cert.subject_alt_names().unwrap();
        assert_eq!(sans.get(0).unwrap().ipaddress(), Some(&[192u8, 0, 2, 7][..]));
        assert_eq!(sans.get(1).unwrap().dnsname(), Some("app.example"));
    }

    #[test]
    fn test_server_rotation_is_keyed_by_peer() {
        let (dir, protocol) = protocol();
        let peer = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));
        let request = |names: &str, rotate| Request::IssueServer {
            peer,
            request: IssueRequest::parse(names, rotate),
        };

        protocol.process_request(request("one.example", false)).unwrap();
        let before = std::fs::read(dir.path().join("198.51.100.1.pem")).unwrap();

        // new names without rotation: cached certificate is served
        protocol.process_request(request("two.example", false)).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("198.51.100.1.pem")).unwrap(),
            before
        );

        protocol.process_request(request("two.example", true)).unwrap();
        let after = std::fs::read(dir.path().join("198.51.100.1.pem")).unwrap();
        assert_ne!(after, before);
        let cert = openssl::x509::X509::from_pem(&after).unwrap();
        let sans = cert.subject_alt_names().unwrap();
        assert_eq!(sans.get(1).unwrap().dnsname(), Some("two.example"));
    }

    #[test]
    fn test_batch_continues_after_failure() {
        let (dir, protocol) = protocol();
        let servers = vec![vec!["srv.example".to_string(), "10.1.1.1".to_string()]];
        let clients = vec!["ca".to_string(), "dave".to_string()];

        let report = protocol.run_batch(&servers, &clients);
        assert_eq!(report.issued, vec!["srv.example", "dave"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, CertError::ReservedIdentity(_)));
        assert!(!report.is_success());

        assert!(dir.path().join("srv.example.pem").exists());
        assert!(!dir.path().join("srv.example.pfx").exists());
        assert!(dir.path().join("dave.pfx").exists());
    }

    #[test]
    fn test_archives_stay_consistent_during_rotation() {
        let (_dir, protocol) = protocol();
        let protocol = Arc::new(protocol);
        protocol
            .process_request(Request::IssueClient(IssueRequest::parse("alice", false)))
            .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let rotator = {
            let protocol = Arc::clone(&protocol);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    protocol
                        .process_request(Request::IssueClient(IssueRequest::parse("alice", true)))
                        .unwrap();
                }
            })
        };

        for _ in 0..60 {
            let archive = protocol
                .process_request(Request::IssueClient(IssueRequest::parse("alice", false)))
                .unwrap();
            assert_eq!(
                file_names(&archive),
                vec!["ca.pem", "alice.pem", "alice.key", "alice.pfx"]
            );

            let mut zip = zip::ZipArchive::new(Cursor::new(archive.body.as_slice())).unwrap();
            let cert = X509::from_pem(&entry(&mut zip, "alice.pem")).unwrap();
            let key = PKey::private_key_from_pem(&entry(&mut zip, "alice.key")).unwrap();
            assert!(cert.public_key().unwrap().public_eq(&key));
        }

        done.store(true, Ordering::SeqCst);
        rotator.join().unwrap();
    }
}
