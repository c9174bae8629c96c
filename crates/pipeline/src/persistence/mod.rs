//! Facade over the entity store and the blob store.
//!
//! Nothing else in the pipeline writes to either store directly: every
//! operation that touches both goes through [`Persistence`], which keeps image
//! rows and blobs in step (best effort, there is no transaction spanning
//! both) and refreshes the published [`Stats`] once it is done, whether it
//! succeeded or not.

pub mod error;
mod locks;

use self::error::{ErrorKind, Result};
use self::locks::RowLocks;
use crate::analysis::ManualText;
use exn::{OptionExt, ResultExt};
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::watch;
use wisdom_cache::{Credential, CredentialId, Image, ImageId, NewImage, Repository};
use wisdom_storage::{BlobHandle, content_hash};

/// Result of [`Persistence::add`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The bytes were new: blob written and row inserted.
    Added(Image),
    /// The bytes were already known under another URL; only the URL of the
    /// existing row changed.
    Rediscovered(Image),
}

/// Result of [`Persistence::attach_data`].
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// The image now has its bytes and content hash.
    Attached(Image),
    /// Another image already had exactly these bytes. That image took over
    /// the URL and the original row was deleted.
    Merged(Image),
}

/// How a delivery layer should send an image for a given credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A platform handle valid for the credential.
    Cached(String),
    /// No usable handle; send by URL instead.
    Remote(String),
}

/// Counters published after every mutating operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub images: u64,
    pub with_text: u64,
    pub with_data: u64,
    /// Number of images per analyser id, sorted by id.
    pub by_analyser: Vec<(String, u64)>,
}

/// Shared handle to both stores. Cheap to clone.
#[derive(Clone)]
pub struct Persistence {
    repo: Repository,
    blobs: BlobHandle,
    locks: RowLocks,
    stats: Arc<watch::Sender<Stats>>,
}

impl Persistence {
    pub fn new(repo: Repository, blobs: BlobHandle) -> Self {
        let (stats, _) = watch::channel(Stats::default());
        Self { repo, blobs, locks: RowLocks::new(), stats: Arc::new(stats) }
    }

    /// Direct access to the entity store for read-only queries.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// The most recently published counters.
    pub fn stats(&self) -> Stats {
        self.stats.borrow().clone()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<Stats> {
        self.stats.subscribe()
    }

    /// Recount everything and publish the result. Failures are logged, never
    /// returned: stale counters are not worth failing an operation over.
    pub async fn refresh_stats(&self) {
        match self.count().await {
            Ok(stats) => {
                self.stats.send_replace(stats);
            },
            Err(err) => tracing::warn!(error = ?err, "Could not refresh statistics"),
        }
    }

    async fn count(&self) -> Result<Stats> {
        Ok(Stats {
            images: self.repo.count().await.or_raise(|| ErrorKind::Cache)?,
            with_text: self.repo.count_with_text().await.or_raise(|| ErrorKind::Cache)?,
            with_data: self.repo.count_with_content_hash().await.or_raise(|| ErrorKind::Cache)?,
            by_analyser: self.repo.count_by_analyser().await.or_raise(|| ErrorKind::Cache)?,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: ImageId) -> Result<Option<Image>> {
        self.repo.get(id).await.or_raise(|| ErrorKind::Cache)
    }

    /// Load the bytes of an image, verifying them against its content hash.
    ///
    /// Returns `None` if the image has no hash, the blob is missing, or the
    /// blob is corrupt. Corrupt blobs are removed so the next write can
    /// replace them.
    pub async fn image_data(&self, image: &Image) -> Result<Option<Vec<u8>>> {
        let Some(hash) = image.content_hash.as_deref() else {
            return Ok(None);
        };
        let Some(data) = self.blobs.get(hash).await.or_raise(|| ErrorKind::Storage)? else {
            tracing::debug!(id = %image.id, %hash, "No stored bytes for image");
            return Ok(None);
        };
        if content_hash(&data) != hash {
            tracing::warn!(id = %image.id, %hash, "Stored bytes do not match content hash; discarding");
            self.blobs.put(hash, None).await.or_raise(|| ErrorKind::Storage)?;
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// How `image` should be delivered under `credential`.
    ///
    /// Platforms usually issue several handles per upload (one per size
    /// variant, smallest first); the most recently recorded one is served.
    pub async fn resolve(&self, image: &Image, credential: &Credential) -> Result<Delivery> {
        let mut handles = self.repo.upload_handles(image.id, credential.id).await.or_raise(|| ErrorKind::Cache)?;
        Ok(match handles.pop() {
            Some(handle) => Delivery::Cached(handle),
            None => Delivery::Remote(image.url.clone()),
        })
    }

    /// Get-or-create the credential for a raw platform token.
    pub async fn credential(&self, token: &str) -> Result<Credential> {
        self.repo.credential_for_token(token).await.or_raise(|| ErrorKind::Cache)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store freshly downloaded bytes found at `url`.
    ///
    /// Images are deduplicated by content: if the bytes are already known the
    /// existing row only gets the new URL.
    pub async fn add(&self, url: &str, data: &[u8]) -> Result<AddOutcome> {
        let result = self.add_inner(url, data).await;
        self.refresh_stats().await;
        result
    }

    async fn add_inner(&self, url: &str, data: &[u8]) -> Result<AddOutcome> {
        let hash = content_hash(data);
        if let Some(existing) = self.repo.find_by_content_hash(&hash).await.or_raise(|| ErrorKind::Cache)? {
            // Heals a missing blob; a no-op when it is intact.
            self.blobs.put(&hash, Some(data)).await.or_raise(|| ErrorKind::Storage)?;
            let image = self.modify_inner(existing.id, |image| image.url = url.to_string()).await?;
            tracing::debug!(id = %image.id, %url, "Known image rediscovered under a new URL");
            return Ok(AddOutcome::Rediscovered(image));
        }
        self.blobs.put(&hash, Some(data)).await.or_raise(|| ErrorKind::Storage)?;
        let image = self
            .repo
            .insert(&NewImage::new(url).with_content_hash(hash))
            .await
            .or_raise(|| ErrorKind::Cache)?;
        tracing::info!(id = %image.id, %url, bytes = data.len(), "Image added");
        Ok(AddOutcome::Added(image))
    }

    /// Overwrite every mutable field of an existing image.
    ///
    /// Prefer [`modify`](Self::modify) wherever another task might be
    /// changing the same row.
    pub async fn update(&self, image: &Image) -> Result<Image> {
        let result = async {
            let _guard = self.locks.lock(image.id).await;
            self.write(image).await
        }
        .await;
        self.refresh_stats().await;
        result
    }

    /// Read-modify-write an image under its row lock.
    ///
    /// `change` sees the current row, so concurrent modifications of
    /// different fields never overwrite each other.
    pub async fn modify<F>(&self, id: ImageId, change: F) -> Result<Image>
    where
        F: FnOnce(&mut Image) + Send,
    {
        let result = self.modify_inner(id, change).await;
        self.refresh_stats().await;
        result
    }

    async fn modify_inner<F>(&self, id: ImageId, change: F) -> Result<Image>
    where
        F: FnOnce(&mut Image) + Send,
    {
        let _guard = self.locks.lock(id).await;
        let mut image = self.get(id).await?.ok_or_raise(|| ErrorKind::ImageNotFound(id.0))?;
        change(&mut image);
        self.write(&image).await
    }

    async fn write(&self, image: &Image) -> Result<Image> {
        match self.repo.update(image).await {
            Ok(image) => Ok(image),
            Err(err) if matches!(&*err, wisdom_cache::error::ErrorKind::ImageNotFound(_)) => {
                Err(err.raise(ErrorKind::ImageNotFound(image.id.0)))
            },
            Err(err) => Err(err.raise(ErrorKind::Cache)),
        }
    }

    /// Record text entered by a person. It counts as a perfect analysis, so
    /// no analyser will ever overwrite it.
    pub async fn set_text_manually(&self, id: ImageId, text: impl Into<String>) -> Result<Image> {
        let text = text.into();
        let image = self
            .modify(id, |image| {
                image.set_analysis(Some(text), ManualText::IDENTIFIER, ManualText::QUALITY, UtcDateTime::now())
            })
            .await?;
        tracing::info!(id = %image.id, "Text set manually");
        Ok(image)
    }

    /// Attach downloaded bytes to an image that has none (or lost them).
    ///
    /// If another image already owns these bytes, it takes over the URL and
    /// this image is deleted.
    pub async fn attach_data(&self, id: ImageId, data: &[u8]) -> Result<Attachment> {
        let result = self.attach_data_inner(id, data).await;
        self.refresh_stats().await;
        result
    }

    async fn attach_data_inner(&self, id: ImageId, data: &[u8]) -> Result<Attachment> {
        let hash = content_hash(data);
        if let Some(owner) = self.repo.find_by_content_hash(&hash).await.or_raise(|| ErrorKind::Cache)?
            && owner.id != id
        {
            // Heals the owner's blob; a no-op when it is intact.
            self.blobs.put(&hash, Some(data)).await.or_raise(|| ErrorKind::Storage)?;
            let url = self.get(id).await?.ok_or_raise(|| ErrorKind::ImageNotFound(id.0))?.url;
            let merged = self.modify_inner(owner.id, |image| image.url = url).await?;
            self.delete_inner(id).await?;
            tracing::info!(from = %id, into = %merged.id, "Image merged into existing duplicate");
            return Ok(Attachment::Merged(merged));
        }
        self.blobs.put(&hash, Some(data)).await.or_raise(|| ErrorKind::Storage)?;
        let image = self.modify_inner(id, |image| image.content_hash = Some(hash)).await?;
        tracing::debug!(id = %image.id, bytes = data.len(), "Image bytes attached");
        Ok(Attachment::Attached(image))
    }

    /// Record platform handles for an image under a credential.
    pub async fn add_upload_handles(&self, id: ImageId, credential: CredentialId, handles: &[String]) -> Result<()> {
        self.repo.add_upload_handles(id, credential, handles).await.or_raise(|| ErrorKind::Cache)
    }

    /// Delete an image, its upload handles and its blob. Returns whether the
    /// image existed.
    pub async fn delete(&self, id: ImageId) -> Result<bool> {
        let result = self.delete_inner(id).await;
        self.refresh_stats().await;
        result
    }

    async fn delete_inner(&self, id: ImageId) -> Result<bool> {
        let _guard = self.locks.lock(id).await;
        let Some(image) = self.get(id).await? else {
            return Ok(false);
        };
        let deleted = self.repo.delete(id).await.or_raise(|| ErrorKind::Cache)?;
        if let Some(hash) = image.content_hash.as_deref() {
            self.blobs.put(hash, None).await.or_raise(|| ErrorKind::Storage)?;
        }
        tracing::info!(%id, url = %image.url, "Image deleted");
        Ok(deleted)
    }
}
