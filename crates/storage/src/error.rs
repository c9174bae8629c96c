//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Access denied on the blob tree
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Hash is too short to shard, or contains non-hex characters
    #[display("invalid content hash: {_0}")]
    InvalidHash(#[error(not(source))] String),
    /// Blob root is not usable (relative, or not a directory)
    #[display("invalid blob root: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Io(IoError::other("disk on fire")).is_retryable());
        assert!(!ErrorKind::InvalidHash("zz".to_string()).is_retryable());
        assert!(!ErrorKind::PermissionDenied(PathBuf::from("/blobs")).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::InvalidHash("../x".to_string()).to_string(), "invalid content hash: ../x");
    }
}
