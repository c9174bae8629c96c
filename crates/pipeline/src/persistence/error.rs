//! Error types for the [`persistence`](super) module.

use derive_more::{Display, Error};

/// A persistence error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies which store failed.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A lookup or update via [`wisdom_cache::Repository`] failed.
    #[display("entity store error")]
    Cache,
    /// A [`BlobStore`](wisdom_storage::BlobStore) read, write or delete failed.
    #[display("blob store error")]
    Storage,
    /// An operation addressed an image id that does not exist (any more).
    #[display("image not found: {_0}")]
    ImageNotFound(#[error(not(source))] i64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Storage)
    }
}
