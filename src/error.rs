//! Runtime Error Types

use derive_more::{Display, Error};

/// A runtime error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for building and running the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    /// Opening or migrating the entity database failed.
    #[display("could not open the image database")]
    Database,
    /// The blob directory could not be used.
    #[display("could not open the blob store")]
    Storage,
    /// The configured image source could not be set up.
    #[display("could not set up the image source")]
    Source,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
