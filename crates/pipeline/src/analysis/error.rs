//! Error types for the [`analysis`](super) module.

use derive_more::{Display, Error};

/// An analysis error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Looking up candidates or usage counts failed.
    #[display("could not query the entity store")]
    Cache,
    /// Loading bytes or writing results via the persistence facade failed.
    #[display("persistence error")]
    Persistence,
    /// The selected provider failed to extract text.
    #[display("analyser {_0} failed")]
    Analyser(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Analyser(_))
    }
}
