//! Error types for the [`crawl`](super) module.

use derive_more::{Display, Error};

/// A crawl error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Asking for a URL, or downloading it, failed.
    #[display("image source error")]
    Source,
    #[display("persistence error")]
    Persistence,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source)
    }
}
