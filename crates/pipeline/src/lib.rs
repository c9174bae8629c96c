//! The moving parts: everything that turns the two stores into a pipeline.
//!
//! Three independent periodic jobs share one [`Persistence`]:
//! - the [`Crawler`](crawl::Crawler) pulls new images from an
//!   [`ImageSource`](source::ImageSource),
//! - the [`AnalysisJob`](analysis::AnalysisJob) keeps improving the text of
//!   stored images with the best [`Analyser`](analysis::Analyser) that still
//!   has capacity left this month,
//! - the [`Uploader`](upload::Uploader) pushes every image to a
//!   [`Platform`](platform::Platform) once per credential and remembers the
//!   handles it got back.
//!
//! Each of them is driven by its own [`Worker`](worker::Worker). The
//! [`backfill`] stream is a one-off maintenance pass for images whose bytes
//! were never fetched.

pub mod analysis;
mod backfill;
pub mod crawl;
pub mod error;
pub mod persistence;
pub mod platform;
pub mod source;
pub mod upload;
pub mod worker;
#[cfg(test)]
mod testing;

pub use crate::backfill::{BackfillEvent, MAX_BACKFILL_CONCURRENCY, backfill};
pub use crate::persistence::{AddOutcome, Attachment, Delivery, Persistence, Stats};
