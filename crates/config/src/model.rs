use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub persistence: PersistenceConfig,
    pub source: SourceConfig,
    pub crawler: CrawlerConfig,
    pub analysis: AnalysisConfig,
    pub uploader: UploaderConfig,
}

impl Config {
    /// Reject settings that deserialize fine but could never work.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("crawler.interval", self.crawler.interval),
            ("analysis.interval", self.analysis.interval),
            ("uploader.interval", self.uploader.interval),
        ];
        for (key, interval) in intervals {
            if interval.is_zero() {
                exn::bail!(ErrorKind::Invalid(format!("{key} must be greater than zero")));
            }
        }
        if self.analysis.batch_size == 0 {
            exn::bail!(ErrorKind::Invalid("analysis.batch_size must be at least 1".to_string()));
        }
        if self.crawler.recent_capacity == 0 {
            exn::bail!(ErrorKind::Invalid("crawler.recent_capacity must be at least 1".to_string()));
        }
        if let Some(endpoint) = &self.source.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            exn::bail!(ErrorKind::Invalid(format!("source.endpoint is not an HTTP URL: {endpoint}")));
        }
        Ok(())
    }
}

/// Where the entity database and the blob tree live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Root directory of the sharded blob tree.
    pub blobs: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let base = directories::ProjectDirs::from("", "", "wisdom")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"));
        Self {
            database: base.join("wisdom.db"),
            blobs: base.join("images"),
        }
    }
}

/// Upstream image generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Generator endpoint; without one the crawler has nothing to crawl.
    pub endpoint: Option<String>,
    #[serde(with = "crate::seconds")]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { endpoint: None, timeout: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub enabled: bool,
    #[serde(with = "crate::seconds")]
    pub interval: Duration,
    /// How many recently generated URLs are remembered and skipped.
    pub recent_capacity: u64,
    #[serde(with = "crate::seconds")]
    pub recent_ttl: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            recent_capacity: 1024,
            recent_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    #[serde(with = "crate::seconds")]
    pub interval: Duration,
    /// Number of candidate ids pulled into the work queue per refill.
    pub batch_size: usize,
    /// Extra delay when every image is already at target quality.
    #[serde(with = "crate::seconds")]
    pub idle_backoff: Duration,
    /// Extra delay when every provider has used up its monthly capacity.
    #[serde(with = "crate::seconds")]
    pub starved_backoff: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            batch_size: 32,
            idle_backoff: Duration::from_secs(60),
            starved_backoff: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub enabled: bool,
    #[serde(with = "crate::seconds")]
    pub interval: Duration,
    /// Send the recognised text along with each upload.
    pub caption_images_with_text: bool,
    /// Extra delay when every image is already uploaded.
    #[serde(with = "crate::seconds")]
    pub idle_backoff: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3),
            caption_images_with_text: false,
            idle_backoff: Duration::from_secs(60),
        }
    }
}
