//! Pre-uploading images to the messaging platform.
//!
//! Once an image has a handle for a credential, the delivery layer can send
//! it by handle instead of by URL (see
//! [`Persistence::resolve`](crate::Persistence::resolve)).

pub mod error;

use self::error::{ErrorKind, Result};
use crate::error::ErrorKind as PipelineErrorKind;
use crate::persistence::{Attachment, Persistence};
use crate::platform::{PlatformHandle, UploadSource};
use crate::source::SourceHandle;
use crate::worker::{Cycle, Job};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use wisdom_cache::{Credential, Image, ImageId};
use wisdom_config::UploaderConfig;

/// Failed uploads of one image before it is passed over for the others.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Periodic job that uploads one image per cycle.
///
/// An image the platform rejects [`MAX_UPLOAD_ATTEMPTS`] times in a row is
/// skipped until nothing else is left to upload, then tried again.
pub struct Uploader {
    persistence: Persistence,
    platform: PlatformHandle,
    /// Used to re-download images whose bytes are gone. Without it those
    /// images are deleted straight away.
    source: Option<SourceHandle>,
    caption_images_with_text: bool,
    idle_backoff: Duration,
    credential: Option<Credential>,
    failures: HashMap<ImageId, u32>,
    skipped: Vec<ImageId>,
}

impl Uploader {
    pub fn new(
        persistence: Persistence,
        platform: PlatformHandle,
        source: Option<SourceHandle>,
        config: &UploaderConfig,
    ) -> Self {
        Self {
            persistence,
            platform,
            source,
            caption_images_with_text: config.caption_images_with_text,
            idle_backoff: config.idle_backoff,
            credential: None,
            failures: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    async fn credential(&mut self) -> Result<Credential> {
        if let Some(credential) = &self.credential {
            return Ok(credential.clone());
        }
        let credential = self
            .persistence
            .credential(self.platform.token())
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        self.credential = Some(credential.clone());
        Ok(credential)
    }

    /// The bytes to upload for `image`, re-downloading them if they are
    /// missing. `None` means the cycle is already over: the image was deleted,
    /// or merged into another image that will come up in a later cycle.
    async fn image_data(&self, image: &Image) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.persistence.image_data(image).await.or_raise(|| ErrorKind::Persistence)? {
            return Ok(Some(data));
        }
        let downloaded = match &self.source {
            Some(source) => match source.download(&image.url).await {
                Ok(data) => Some(data),
                Err(err) => {
                    tracing::warn!(id = %image.id, url = %image.url, error = ?err, "Could not recover image bytes");
                    None
                },
            },
            None => None,
        };
        let Some(data) = downloaded else {
            self.persistence.delete(image.id).await.or_raise(|| ErrorKind::Persistence)?;
            tracing::warn!(id = %image.id, url = %image.url, "Deleted image without recoverable bytes");
            return Ok(None);
        };
        match self
            .persistence
            .attach_data(image.id, &data)
            .await
            .or_raise(|| ErrorKind::Persistence)?
        {
            Attachment::Attached(_) => Ok(Some(data)),
            Attachment::Merged(into) => {
                tracing::debug!(from = %image.id, into = %into.id, "Recovered bytes belong to another image");
                Ok(None)
            },
        }
    }

    fn record_failure(&mut self, id: ImageId) {
        let attempts = self.failures.entry(id).or_default();
        *attempts += 1;
        if *attempts >= MAX_UPLOAD_ATTEMPTS {
            self.failures.remove(&id);
            self.skipped.push(id);
            tracing::warn!(%id, attempts = MAX_UPLOAD_ATTEMPTS, "Upload keeps failing; skipping image for now");
        }
    }

    fn caption<'a>(&self, image: &'a Image) -> Option<&'a str> {
        if !self.caption_images_with_text {
            return None;
        }
        image.text.as_deref().filter(|text| !text.trim().is_empty())
    }

    #[instrument(level = "debug", name = "upload", skip_all)]
    async fn cycle(&mut self) -> Result<Cycle> {
        let credential = self.credential().await?;
        let next = self
            .persistence
            .repository()
            .find_without_upload(credential.id, &self.skipped)
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        let Some(image) = next else {
            if self.skipped.is_empty() {
                tracing::debug!("Every image is already uploaded");
            } else {
                tracing::debug!(skipped = self.skipped.len(), "Only skipped images left; retrying them after backoff");
                self.skipped.clear();
            }
            return Ok(Cycle::Backoff(self.idle_backoff));
        };
        let Some(data) = self.image_data(&image).await? else {
            return Ok(Cycle::Worked);
        };

        let bytes = data.len();
        let uploaded = self.platform.upload(UploadSource::Bytes(data), self.caption(&image)).await;
        let handles = match uploaded {
            Ok(handles) if !handles.is_empty() => handles,
            Ok(_) => {
                self.record_failure(image.id);
                exn::bail!(ErrorKind::NoHandle(image.id.0));
            },
            Err(err) => {
                self.record_failure(image.id);
                return Err(err.raise(ErrorKind::Platform));
            },
        };
        self.failures.remove(&image.id);
        self.persistence
            .add_upload_handles(image.id, credential.id, &handles)
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        tracing::info!(id = %image.id, bytes, handles = handles.len(), "Image uploaded");
        Ok(Cycle::Worked)
    }
}

#[async_trait]
impl Job for Uploader {
    fn name(&self) -> &str {
        "uploader"
    }

    async fn run(&mut self) -> crate::error::Result<Cycle> {
        self.cycle().await.or_raise(|| PipelineErrorKind::Upload)
    }
}
