//! Error types for the [`upload`](super) module.

use derive_more::{Display, Error};

/// An upload error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for upload operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("persistence error")]
    Persistence,
    /// The platform failed the upload.
    #[display("platform error")]
    Platform,
    /// The platform reported success but issued no handle.
    #[display("platform issued no handle for image {_0}")]
    NoHandle(#[error(not(source))] i64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Platform | Self::NoHandle(_))
    }
}
