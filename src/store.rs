//! Content-addressed blob storage
//!
//! Blobs are identified by the SHA-256 of their bytes. Writes go through a
//! temporary file in the same directory and are renamed into place, so a
//! reader never observes a partially written blob.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn for_bytes(bytes: &[u8]) -> Self {
        BlobId(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts only 64 lowercase hex digits.
    pub fn parse(s: &str) -> Option<Self> {
        (s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
            .then(|| BlobId(s.to_string()))
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage for task inputs and outputs. Implementations own
/// durability; callers only hold [`BlobId`]s across tasks.
pub trait BlobStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> Result<BlobId>;
    fn get(&self, id: &BlobId) -> Result<Vec<u8>>;
    fn contains(&self, id: &BlobId) -> bool;

    /// Materialise a blob at a local path for an external tool.
    fn get_to_path(&self, id: &BlobId, path: &Path) -> Result<()> {
        let bytes = self.get(id)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Blob store on a local (or network-mounted) directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &BlobId) -> PathBuf {
        // Two-level fan-out keeps directories small.
        self.root.join(&id.as_str()[..2]).join(id.as_str())
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<BlobId> {
        let id = BlobId::for_bytes(bytes);
        let path = self.path_for(&id);
        if path.exists() {
            return Ok(id);
        }
        let dir = path
            .parent()
            .ok_or_else(|| PipelineError::Infrastructure("blob path has no parent".into()))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| PipelineError::Infrastructure(e.to_string()))?;
        Ok(id)
    }

    fn get(&self, id: &BlobId) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        fs::read(&path).map_err(|e| {
            PipelineError::Infrastructure(format!("blob {} unavailable: {}", id, e))
        })
    }

    fn contains(&self, id: &BlobId) -> bool {
        self.path_for(id).is_file()
    }
}
