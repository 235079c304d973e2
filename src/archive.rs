//! Zip archives of artifact files, as returned to network callers.

use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{CertError, Result};

/// Pack `files` into an in-memory zip. Entries are named by file name only.
pub fn zip_files(files: &[PathBuf]) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buf));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o600);

        for path in files {
            let contents = fs::read(path).map_err(|e| CertError::filesystem(path, e))?;
            let entry_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            zip.start_file(entry_name, options)?;
            zip.write_all(&contents)
                .map_err(|e| CertError::filesystem(path, e))?;
        }
        zip.finish()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_zip_contains_files_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("ca.pem");
        let b = dir.path().join("alice.key");
        fs::write(&a, b"root").unwrap();
        fs::write(&b, b"secret").unwrap();

        let bytes = zip_files(&[a, b]).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut contents = String::new();
        archive
            .by_name("alice.key")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "secret");
        assert!(archive.by_name("ca.pem").is_ok());
    }

    #[test]
    fn test_missing_file_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = zip_files(&[dir.path().join("absent.pem")]).unwrap_err();
        assert!(matches!(err, CertError::Filesystem { .. }));
    }
}
