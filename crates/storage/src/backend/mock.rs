//! In-memory blob store for testing.

use crate::error::Result;
use crate::path::validate as validate_hash;
use crate::{BlobStore, content_hash};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory blob store for testing.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation.
///
/// # Examples
///
/// ```
/// use wisdom_storage::backend::MockBlobStore;
/// use wisdom_storage::{BlobStore, content_hash};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let blobs = MockBlobStore::with_blobs([b"image bytes".to_vec()]);
/// assert!(blobs.exists(&content_hash(b"image bytes")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBlobStore {
    name: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MockBlobStore {
    /// Create a mock store pre-populated with blobs, each keyed by the hash of
    /// its own content.
    pub fn with_blobs(blobs: impl IntoIterator<Item = impl Into<Vec<u8>>>) -> Self {
        let blobs = blobs
            .into_iter()
            .map(Into::into)
            .map(|data: Vec<u8>| (content_hash(&data), data))
            .collect();
        Self {
            name: "mock".to_string(),
            blobs: RwLock::new(blobs),
        }
    }

    /// Change the name of the mock store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of blobs currently held.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}
impl Default for MockBlobStore {
    fn default() -> Self {
        Self::with_blobs(Vec::<Vec<u8>>::new())
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, hash: &str, data: Option<&[u8]>) -> Result<()> {
        let hash = validate_hash(hash)?;
        let mut blobs = self.blobs.write().await;
        match data {
            None => {
                blobs.remove(&hash);
            },
            Some(data) => {
                if blobs.get(&hash).is_some_and(|existing| content_hash(existing) == hash) {
                    return Ok(());
                }
                blobs.insert(hash, data.to_vec());
            },
        }
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let hash = validate_hash(hash)?;
        Ok(self.blobs.read().await.get(&hash).cloned())
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        let hash = validate_hash(hash)?;
        Ok(self.blobs.read().await.contains_key(&hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MockBlobStore::default();
        let hash = content_hash(b"data");
        store.put(&hash, Some(b"data")).await.unwrap();
        assert_eq!(store.get(&hash).await.unwrap(), Some(b"data".to_vec()));
        store.put(&hash, None).await.unwrap();
        assert!(store.is_empty().await);
    }
}
