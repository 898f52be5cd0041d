//! Bucketed on-disk (and object-storage) layout for media blobs.
//!
//! Stored files live under one of `jpg/`, `png/`, `tdb/`, `bin/`, `blobs/`,
//! `videos/` or `descriptors/`, each split two to three directory layers deep
//! by a short prefix of the content hash so no single directory accumulates
//! millions of entries. The file name itself is the full hash, so repeated
//! stores of identical bytes are idempotent and distinct bytes never collide.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum MediaStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object storage error: {0}")]
    ObjectStore(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

pub type MediaStoreResult<T> = Result<T, MediaStoreError>;

/// One of the top-level content trees named in the on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaBucket {
    Jpg,
    Png,
    Tdb,
    Bin,
    Blobs,
    Videos,
    Descriptors,
}

impl MediaBucket {
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaBucket::Jpg => "jpg",
            MediaBucket::Png => "png",
            MediaBucket::Tdb => "tdb",
            MediaBucket::Bin => "bin",
            MediaBucket::Blobs => "blobs",
            MediaBucket::Videos => "videos",
            MediaBucket::Descriptors => "descriptors",
        }
    }
}

/// Computes the content-derived relative path for a blob: `<bucket>/<p0>/<p1>/<hash>`,
/// where `p0`/`p1` are the first two byte-pairs of the hex digest.
fn content_path(bucket: MediaBucket, bytes: &[u8]) -> (String, PathBuf) {
    let digest = Sha256::digest(bytes);
    let hex = format!("{:x}", digest);
    let p0 = &hex[0..2];
    let p1 = &hex[2..4];
    let rel = PathBuf::from(bucket.dir_name()).join(p0).join(p1).join(&hex);
    (hex, rel)
}

/// Storage surface media operations write finished blobs through and read
/// inputs back from. Implementations are agnostic of image/video semantics;
/// they only know about bytes, buckets, and content-derived keys.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put(&self, bucket: MediaBucket, bytes: &[u8]) -> MediaStoreResult<String>;
    async fn get(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<Vec<u8>>;
    async fn remove(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<()>;
}

/// Local-filesystem implementation rooted at the persistence base directory.
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        LocalMediaStore { root: root.as_ref().to_path_buf() }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn path_for_key(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<PathBuf> {
        if key.len() < 4 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MediaStoreError::NotFound(key.to_string()));
        }
        Ok(self.root.join(bucket.dir_name()).join(&key[0..2]).join(&key[2..4]).join(key))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn put(&self, bucket: MediaBucket, bytes: &[u8]) -> MediaStoreResult<String> {
        let (hex, rel) = content_path(bucket, bytes);
        let full = self.root.join(&rel);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::metadata(&full).await.is_err() {
            tokio::fs::write(&full, bytes).await?;
            debug!(bucket = bucket.dir_name(), key = %hex, "wrote media blob");
        }
        Ok(hex)
    }

    async fn get(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<Vec<u8>> {
        let path = self.path_for_key(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaStoreError::NotFound(key.to_string())
            } else {
                MediaStoreError::Io(e)
            }
        })
    }

    async fn remove(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<()> {
        let path = self.path_for_key(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Object-storage-backed implementation, mirroring the same relative layout
/// under a bucket prefix instead of a filesystem root.
pub struct ObjectStoreMediaStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl ObjectStoreMediaStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        ObjectStoreMediaStore { client, bucket: bucket.into(), prefix: prefix.into() }
    }

    fn object_key(&self, rel: &Path) -> String {
        let rel = rel.to_string_lossy().replace('\\', "/");
        if self.prefix.is_empty() {
            rel
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), rel)
        }
    }
}

#[async_trait]
impl MediaStore for ObjectStoreMediaStore {
    async fn put(&self, bucket: MediaBucket, bytes: &[u8]) -> MediaStoreResult<String> {
        let (hex, rel) = content_path(bucket, bytes);
        let key = self.object_key(&rel);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| MediaStoreError::ObjectStore(e.to_string()))?;
        debug!(bucket = bucket.dir_name(), key = %hex, "uploaded media blob");
        Ok(hex)
    }

    async fn get(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<Vec<u8>> {
        if key.len() < 4 {
            return Err(MediaStoreError::NotFound(key.to_string()));
        }
        let rel = PathBuf::from(bucket.dir_name()).join(&key[0..2]).join(&key[2..4]).join(key);
        let object_key = self.object_key(&rel);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| MediaStoreError::ObjectStore(e.to_string()))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| MediaStoreError::ObjectStore(e.to_string()))?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    async fn remove(&self, bucket: MediaBucket, key: &str) -> MediaStoreResult<()> {
        if key.len() < 4 {
            return Ok(());
        }
        let rel = PathBuf::from(bucket.dir_name()).join(&key[0..2]).join(&key[2..4]).join(key);
        let object_key = self.object_key(&rel);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| MediaStoreError::ObjectStore(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn repeated_stores_of_identical_bytes_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(dir.path());
        let bytes = b"hello media";
        let key1 = store.put(MediaBucket::Jpg, bytes).await.unwrap();
        let key2 = store.put(MediaBucket::Jpg, bytes).await.unwrap();
        assert_eq!(key1, key2);

        let fetched = store.get(MediaBucket::Jpg, &key1).await.unwrap();
        assert_eq!(fetched, bytes);
    }

    #[tokio::test]
    async fn distinct_bytes_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(dir.path());
        let key1 = store.put(MediaBucket::Png, b"a").await.unwrap();
        let key2 = store.put(MediaBucket::Png, b"b").await.unwrap();
        assert_ne!(key1, key2);
    }

    #[tokio::test]
    async fn missing_key_is_reported_as_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalMediaStore::new(dir.path());
        let result = store.get(MediaBucket::Bin, "0000000000000000000000000000000000000000000000000000000000000000").await;
        assert!(matches!(result, Err(MediaStoreError::NotFound(_))));
    }
}
