//! Configuration loading and validation.
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. `wisdom.yaml`, `wisdom.yml`, `wisdom.toml` or `wisdom.json` in the
//!    platform configuration directory,
//! 3. the same files in the current working directory,
//! 4. `WISDOM_`-prefixed environment variables, with `__` separating nested
//!    keys (`WISDOM_UPLOADER__INTERVAL=5`).
//!
//! Durations are written as (fractional) seconds everywhere.

pub mod error;
mod load;
mod model;
mod seconds;

pub use crate::load::{ENV_PREFIX, FILE_STEM, search_dirs};
pub use crate::model::{AnalysisConfig, Config, CrawlerConfig, PersistenceConfig, SourceConfig, UploaderConfig};
