//! Content identity of a file: SHA-256 digest plus byte size.

use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;

const HASH_BUFFER_SIZE: usize = 8192;

/// Fingerprint captured on a source file right before it is moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    /// Lowercase hex SHA-256 of the file content.
    pub content_hash: String,
    pub size: u64,
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.content_hash.get(..12).unwrap_or(&self.content_hash);
        write!(f, "sha256:{}/{}", short, self.size)
    }
}

/// Hash the full content of the file at `path`.
///
/// A missing file is reported as `NotFound`; any other read failure as
/// `Filesystem`.
pub fn capture_identity(path: &Path) -> Result<FileIdentity> {
    let mut file = fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AuditError::NotFound(format!("file {}", path.display()))
        } else {
            AuditError::fs(path, e)
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer).map_err(|e| AuditError::fs(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok(FileIdentity {
        content_hash: hex::encode(hasher.finalize()),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, b"hello").unwrap();

        let first = capture_identity(&path).unwrap();
        let second = capture_identity(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.size, 5);
        assert_eq!(
            first.content_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn content_change_changes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        fs::write(&path, b"hello").unwrap();
        let before = capture_identity(&path).unwrap();
        fs::write(&path, b"hellp").unwrap();
        let after = capture_identity(&path).unwrap();
        assert_eq!(before.size, after.size);
        assert_ne!(before, after);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture_identity(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, AuditError::NotFound(_)));
    }
}
