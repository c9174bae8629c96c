//! Pipeline Error Types
//!
//! Every module with its own failure modes (persistence, analysis, crawl,
//! upload) has its own `error` module; those are raised into the kinds
//! below at the module boundary.

use derive_more::{Display, Error};

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The upstream image generator (or the host serving an image) failed.
    #[display("image source error")]
    Source,
    /// A text analyser failed to process an image.
    #[display("text analyser error")]
    Analyser,
    /// The messaging platform rejected or failed an upload.
    #[display("platform error")]
    Platform,
    #[display("persistence error")]
    Persistence,
    #[display("crawl cycle failed")]
    Crawl,
    #[display("analysis cycle failed")]
    Analysis,
    #[display("upload cycle failed")]
    Upload,
    #[display("byte backfill failed")]
    Backfill,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Collaborators sit on the other side of a network; everything else is
    /// retried by the next worker cycle anyway.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source | Self::Analyser | Self::Platform)
    }
}
