//! Blob storage collaborator interface.
//!
//! The service only needs two operations from the blob subsystem: save
//! bytes under an opaque location and fetch them back. Thumbnailing,
//! remote stores, and the rest of that subsystem live elsewhere.

use std::{collections::HashMap, path::PathBuf};

use {async_trait::async_trait, tokio::sync::RwLock, tracing::debug};

use parley_common::{Error, Result};

use crate::models::new_id;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes`, returning an opaque location for later retrieval.
    /// `file_name` contributes only its extension to the location.
    async fn save(&self, bytes: &[u8], file_name: &str, content_type: &str) -> Result<String>;

    /// Fetch the bytes stored at `location`.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

// ── Local filesystem driver ─────────────────────────────────────────────────

/// Stores blobs as flat files under a root directory with random names.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, bytes: &[u8], file_name: &str, _content_type: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::storage(format!("create {}: {e}", self.root.display())))?;

        let location = match file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => format!("{}.{ext}", new_id()),
            _ => new_id(),
        };
        let path = self.root.join(&location);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::storage(format!("write {}: {e}", path.display())))?;
        debug!(location = %location, size = bytes.len(), "blob saved");
        Ok(location)
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        // Locations are flat file names; anything path-like is foreign.
        if location.contains('/') || location.contains('\\') || location.contains("..") {
            return Err(Error::storage(format!("invalid blob location '{location}'")));
        }
        let path = self.root.join(location);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::storage(format!("read {}: {e}", path.display())))
    }
}

// ── In-memory driver ────────────────────────────────────────────────────────

/// Keeps blobs in a map. Test double.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, bytes: &[u8], _file_name: &str, _content_type: &str) -> Result<String> {
        let location = new_id();
        self.blobs
            .write()
            .await
            .insert(location.clone(), bytes.to_vec());
        Ok(location)
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| Error::storage(format!("no blob at '{location}'")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_round_trip_preserves_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let location = store.save(b"hello", "photo.jpg", "image/jpeg").await.unwrap();
        assert!(location.ends_with(".jpg"));
        assert_eq!(store.fetch(&location).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn local_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.fetch("../etc/passwd").await.is_err());
        assert!(store.fetch("a/b").await.is_err());
    }

    #[tokio::test]
    async fn local_missing_blob_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.fetch("nope.bin").await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let store = MemoryBlobStore::new();
        let location = store.save(b"bytes", "f.txt", "text/plain").await.unwrap();
        assert_eq!(store.fetch(&location).await.unwrap(), b"bytes");
        assert!(store.fetch("missing").await.is_err());
    }
}
