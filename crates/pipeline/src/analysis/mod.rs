//! Text extraction: providers, provider selection, and the worker that keeps
//! upgrading stored images to the best analysis available.
//!
//! Providers advertise a quality and a monthly capacity. The worker walks the
//! [`NonOptimalQueue`] of images analysed worse than the best enabled
//! provider, and for each one picks the best provider that still has capacity
//! left in the trailing [`CAPACITY_WINDOW`].

mod analyser;
pub mod error;
mod job;
mod queue;
mod select;

pub use self::analyser::{Analyser, AnalyserHandle, ManualText};
pub use self::job::{AnalysisJob, merge_analysis};
pub use self::queue::NonOptimalQueue;
pub use self::select::{CAPACITY_WINDOW, select_analyser, target_quality};
