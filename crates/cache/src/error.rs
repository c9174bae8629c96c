//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// An update targeted an image id that has no row.
    #[display("image not found: {_0}")]
    ImageNotFound(#[error(not(source))] i64),
    /// A stored value could not be converted into (or out of) its model.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// SQLite reports lock contention as a plain database error, so that is
    /// the only category worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
