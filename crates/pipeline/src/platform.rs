//! The messaging platform images are uploaded to.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// What to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Raw image bytes.
    Bytes(Vec<u8>),
    /// A handle the platform issued earlier under the same credential.
    Handle(String),
}

/// A messaging platform that hosts uploaded images.
///
/// Implementations raise [`ErrorKind::Platform`](crate::error::ErrorKind::Platform)
/// for every failure.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Raw access token of the identity uploads are made under. Only its
    /// hash is ever persisted.
    fn token(&self) -> &str;

    /// Upload an image and return every handle the platform issued for it
    /// (usually one per size variant, smallest first). Never empty on success.
    async fn upload(&self, source: UploadSource, caption: Option<&str>) -> Result<Vec<String>>;
}

pub type PlatformHandle = Arc<dyn Platform>;
