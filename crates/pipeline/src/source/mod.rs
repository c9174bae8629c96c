//! Where new images come from.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use self::http::HttpImageSource;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// An upstream generator of images.
///
/// Implementations raise [`ErrorKind::Source`](crate::error::ErrorKind::Source)
/// for every failure.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Ask the generator for the URL of a new image.
    async fn generate_url(&self) -> Result<String>;

    /// Download the raw bytes behind a URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub type SourceHandle = Arc<dyn ImageSource>;
