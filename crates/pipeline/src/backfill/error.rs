//! Error types for the [`backfill`](super) module.

use derive_more::{Display, Error};

/// A backfill error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for backfill operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Listing images without bytes failed.
    #[display("could not query the entity store")]
    Cache,
    /// Attaching bytes to an image, or deleting it, failed.
    #[display("persistence error for image {_0}")]
    Persistence(#[error(not(source))] i64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Persistence(_))
    }
}
