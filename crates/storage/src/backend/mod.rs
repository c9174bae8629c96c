//! Blob store trait and implementations.
//!
//! This module defines the `BlobStore` trait, a small content-addressed
//! get/put interface, plus a local filesystem implementation and an in-memory
//! implementation for tests in other crates.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBlobStore;
#[cfg(feature = "mock")]
pub use self::mock::MockBlobStore;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for blob stores.
///
/// Every blob is keyed by the content hash of its bytes (see
/// [`content_hash`](crate::content_hash)). Implementations must validate
/// hashes with [`validate_hash`](crate::validate_hash) before touching
/// anything.
///
/// # Examples
///
/// ```
/// use wisdom_storage::{BlobStore, content_hash, error::Result};
///
/// async fn store_once(blobs: &dyn BlobStore, image: &[u8]) -> Result<String> {
///     let hash = content_hash(image);
///     // Writing the same bytes twice is a no-op the second time.
///     blobs.put(&hash, Some(image)).await?;
///     blobs.put(&hash, Some(image)).await?;
///     Ok(hash)
/// }
/// ```
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Name of the store, used for logging only.
    fn name(&self) -> &str;

    /// Write (`Some`) or remove (`None`) the blob for `hash`.
    ///
    /// Writing is idempotent: if the stored blob already hashes to `hash`
    /// nothing is written. A stored blob whose content does not match its
    /// hash is replaced. Removing a blob that doesn't exist is not an error.
    async fn put(&self, hash: &str, data: Option<&[u8]>) -> Result<()>;

    /// Read the blob for `hash`, or `None` if there is no such blob.
    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether a blob exists for `hash` without reading it.
    async fn exists(&self, hash: &str) -> Result<bool>;
}
