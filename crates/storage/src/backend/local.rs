//! Local filesystem blob store.
//!
//! Blobs are stored in a sharded directory tree below a configured root and
//! accessed using `tokio::fs` for async I/O.

use crate::error::{ErrorKind, Result};
use crate::path::{shard_path, validate as validate_hash};
use crate::{BlobStore, content_hash};
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Local filesystem blob store.
///
/// Every operation holds one exclusion lock for its whole duration. Blobs are
/// small and written rarely, so correctness wins over throughput here; share
/// a single instance (through a [`BlobHandle`](crate::BlobHandle)) across the
/// process so the lock actually covers every writer.
///
/// # Examples
///
/// ```no_run
/// use wisdom_storage::backend::LocalBlobStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let blobs = LocalBlobStore::new("images", "/var/lib/wisdom/images")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LocalBlobStore {
    name: String,
    /// Root directory of the shard tree
    root: PathBuf,
    lock: Mutex<()>,
}
impl LocalBlobStore {
    /// Create a new local blob store.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRoot`](ErrorKind::InvalidRoot) if the path is not
    /// absolute or exists but is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidRoot(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidRoot(root));
            }
        } else {
            // Use non-async here; it only happens once on startup and it's
            // not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self {
            name: name.into(),
            root,
            lock: Mutex::new(()),
        })
    }

    fn absolute_path(&self, hash: &str) -> Result<PathBuf> {
        Ok(self.root.join(shard_path(hash)?))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Read a file, treating "not found" as absence rather than an error.
    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e, path))?,
        }
    }

    /// Remove a blob file and every shard directory above it that is left
    /// empty, stopping at the root.
    async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => Err(Self::map_io_error(e, path))?,
        }
        let mut dir = path.parent();
        while let Some(current) = dir
            && current != self.root
            && current.starts_with(&self.root)
        {
            match fs::remove_dir(current).await {
                Ok(()) => dir = current.parent(),
                Err(e) if e.kind() == IoErrorKind::NotFound => dir = current.parent(),
                // Still holds other blobs (or shards): nothing more to prune.
                Err(_) => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, hash: &str, data: Option<&[u8]>) -> Result<()> {
        let hash = validate_hash(hash)?;
        let path = self.absolute_path(&hash)?;
        let _guard = self.lock.lock().await;

        let Some(data) = data else {
            self.remove(&path).await?;
            tracing::debug!(store = %self.name, %hash, "Blob removed");
            return Ok(());
        };

        if let Some(existing) = Self::read_optional(&path).await? {
            if content_hash(&existing) == hash {
                tracing::debug!(store = %self.name, %hash, "Blob already present");
                return Ok(());
            }
            tracing::warn!(store = %self.name, %hash, "Stored blob does not match its hash; replacing");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        fs::write(&path, data).await.map_err(|e| Self::map_io_error(e, &path))?;
        tracing::debug!(store = %self.name, %hash, bytes = data.len(), "Blob saved");
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.absolute_path(hash)?;
        let _guard = self.lock.lock().await;
        Self::read_optional(&path).await
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        let path = self.absolute_path(hash)?;
        let _guard = self.lock.lock().await;
        Ok(fs::try_exists(&path).await.map_err(|e| Self::map_io_error(e, &path))?)
    }
}
