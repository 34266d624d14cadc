//! Raw attachment storage
//!
//! - `FileStore` trait: where uploaded bytes live
//! - `LocalFileStore`: files under `<upload_dir>/<conversation_id>/`
//!
//! Content addressing uses [`content_hash`], computed here rather than by the
//! store so every backend agrees on the digest.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// SHA-256 hex digest of raw bytes
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Where the bytes landed (a filesystem path for [`LocalFileStore`])
    pub reference: String,
    pub size: u64,
}

/// Storage backend for uploaded files
pub trait FileStore: Send + Sync {
    /// Name of this store (for logging)
    fn name(&self) -> &str;

    /// Store bytes under a conversation-scoped location
    fn store(&self, conversation_id: &str, filename: &str, bytes: &[u8]) -> Result<StoredFile>;
}

/// Local filesystem file store
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Create a new local store, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                Error::InvalidData(format!(
                    "Failed to create upload directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
            info!("Created upload directory: {}", root.display());
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileStore for LocalFileStore {
    fn name(&self) -> &str {
        "local"
    }

    fn store(&self, conversation_id: &str, filename: &str, bytes: &[u8]) -> Result<StoredFile> {
        let dir = self.root.join(sanitize_filename(conversation_id));
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}_{}", Uuid::new_v4(), sanitize_filename(filename)));
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), size = bytes.len(), "Stored upload");

        Ok(StoredFile {
            reference: path.to_string_lossy().into_owned(),
            size: bytes.len() as u64,
        })
    }
}

/// Keep only characters that are safe in a single path component
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("boleta 01.pdf"), "boleta_01.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\scans\\f.png"), "f.png");
        assert_eq!(sanitize_filename(".."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn test_store_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().join("uploads")).unwrap();
        assert!(store.root().exists());

        let stored = store.store("conv-1", "boleta.txt", b"TOTAL: 10").unwrap();
        assert_eq!(stored.size, 9);
        assert!(stored.reference.contains("conv-1"));
        assert!(stored.reference.ends_with("_boleta.txt"));

        assert_eq!(fs::read(&stored.reference).unwrap(), b"TOTAL: 10");
    }

    #[test]
    fn test_same_name_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();

        let a = store.store("c", "x.txt", b"a").unwrap();
        let b = store.store("c", "x.txt", b"b").unwrap();
        assert_ne!(a.reference, b.reference);
        assert_eq!(fs::read(&a.reference).unwrap(), b"a");
    }

    #[test]
    fn test_hostile_names_stay_under_root() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path().join("uploads")).unwrap();

        let stored = store.store("../../escape", "../../etc/passwd", b"x").unwrap();
        let path = Path::new(&stored.reference).canonicalize().unwrap();
        let root = store.root().canonicalize().unwrap();

        assert_eq!(path.parent().unwrap().parent().unwrap(), root);
        assert!(path.to_string_lossy().ends_with("_passwd"));
    }
}
