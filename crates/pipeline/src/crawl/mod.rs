//! Harvesting new images from the upstream generator.

pub mod error;

use self::error::{ErrorKind, Result};
use crate::error::ErrorKind as PipelineErrorKind;
use crate::persistence::{AddOutcome, Persistence};
use crate::source::SourceHandle;
use crate::worker::{Cycle, Job};
use async_trait::async_trait;
use exn::ResultExt;
use moka::sync::Cache;
use tracing::instrument;
use wisdom_config::CrawlerConfig;

/// Periodic job that fetches one new image per cycle.
pub struct Crawler {
    persistence: Persistence,
    source: SourceHandle,
    /// URLs handed out recently. The generator likes to repeat itself, and
    /// this saves a database lookup for every repeat.
    recent: Cache<String, ()>,
}

impl Crawler {
    pub fn new(persistence: Persistence, source: SourceHandle, config: &CrawlerConfig) -> Self {
        let recent = Cache::builder()
            .max_capacity(config.recent_capacity)
            .time_to_live(config.recent_ttl)
            .build();
        Self { persistence, source, recent }
    }

    #[instrument(level = "debug", name = "crawl", skip_all)]
    async fn cycle(&self) -> Result<Cycle> {
        let url = self.source.generate_url().await.or_raise(|| ErrorKind::Source)?;
        if self.recent.contains_key(&url) {
            tracing::debug!(%url, "URL seen recently; skipping");
            return Ok(Cycle::Worked);
        }

        let known = self
            .persistence
            .repository()
            .find_by_url(&url)
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        if !known.is_empty() {
            tracing::debug!(%url, "URL already stored; skipping");
            self.recent.insert(url, ());
            return Ok(Cycle::Worked);
        }

        // Only stored URLs go into `recent`.
        let data = self.source.download(&url).await.or_raise(|| ErrorKind::Source)?;
        match self.persistence.add(&url, &data).await.or_raise(|| ErrorKind::Persistence)? {
            AddOutcome::Added(image) => tracing::info!(id = %image.id, %url, "Found new image"),
            AddOutcome::Rediscovered(image) => tracing::info!(id = %image.id, %url, "Found known image at a new URL"),
        }
        self.recent.insert(url, ());
        Ok(Cycle::Worked)
    }
}

#[async_trait]
impl Job for Crawler {
    fn name(&self) -> &str {
        "crawler"
    }

    async fn run(&mut self) -> crate::error::Result<Cycle> {
        self.cycle().await.or_raise(|| PipelineErrorKind::Crawl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, persistence};
    use std::sync::Arc;
    use wisdom_storage::content_hash;

    fn crawler(persistence: &Persistence, source: &Arc<FakeSource>) -> Crawler {
        Crawler::new(persistence.clone(), Arc::clone(source) as SourceHandle, &CrawlerConfig::default())
    }

    #[tokio::test]
    async fn test_adds_new_image() {
        let (persistence, _blobs) = persistence().await;
        let source = Arc::new(FakeSource::new().with_image("https://example.com/1", b"one"));
        let mut crawler = crawler(&persistence, &source);

        assert_eq!(crawler.run().await.unwrap(), Cycle::Worked);
        let images = persistence.repository().find_by_url("https://example.com/1").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].content_hash, Some(content_hash(b"one")));
        assert!(!images[0].is_analysed());
        assert_eq!(persistence.stats().images, 1);
    }

    #[tokio::test]
    async fn test_same_bytes_under_new_url_update_existing_row() {
        let (persistence, _blobs) = persistence().await;
        let source = Arc::new(
            FakeSource::new()
                .with_image("https://example.com/1", b"same")
                .with_image("https://example.com/2", b"same"),
        );
        let mut crawler = crawler(&persistence, &source);

        crawler.run().await.unwrap();
        crawler.run().await.unwrap();
        assert_eq!(persistence.repository().count().await.unwrap(), 1);
        let image = persistence.repository().find_by_content_hash(content_hash(b"same")).await.unwrap().unwrap();
        assert_eq!(image.url, "https://example.com/2");
    }

    #[tokio::test]
    async fn test_recently_seen_url_is_not_downloaded() {
        let (persistence, _blobs) = persistence().await;
        let source = Arc::new(
            FakeSource::new()
                .with_image("https://example.com/1", b"one")
                .with_url("https://example.com/1"),
        );
        let mut crawler = crawler(&persistence, &source);

        crawler.run().await.unwrap();
        crawler.run().await.unwrap();
        assert_eq!(source.downloads(), 1);
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_when_url_repeats() {
        let (persistence, _blobs) = persistence().await;
        let source = Arc::new(
            FakeSource::new()
                .with_image("https://example.com/flaky", b"flaky")
                .with_url("https://example.com/flaky")
                .with_url("https://example.com/flaky")
                .failing_first(1),
        );
        let mut crawler = crawler(&persistence, &source);

        assert!(crawler.run().await.is_err());
        assert_eq!(crawler.run().await.unwrap(), Cycle::Worked);
        assert_eq!(persistence.repository().find_by_url("https://example.com/flaky").await.unwrap().len(), 1);
        // Stored now, so the third repeat is answered from the recent set.
        assert_eq!(crawler.run().await.unwrap(), Cycle::Worked);
        assert_eq!(source.downloads(), 2);
    }

    #[tokio::test]
    async fn test_stored_url_is_not_downloaded() {
        let (persistence, _blobs) = persistence().await;
        persistence.add("https://example.com/1", b"one").await.unwrap();
        let source = Arc::new(FakeSource::new().with_image("https://example.com/1", b"one"));
        let mut crawler = crawler(&persistence, &source);

        assert_eq!(crawler.run().await.unwrap(), Cycle::Worked);
        assert_eq!(source.downloads(), 0);
    }

    #[tokio::test]
    async fn test_download_failure_fails_only_the_cycle() {
        let (persistence, _blobs) = persistence().await;
        let source = Arc::new(
            FakeSource::new()
                .with_url("https://example.com/broken")
                .with_image("https://example.com/2", b"two"),
        );
        let mut crawler = crawler(&persistence, &source);

        let err = crawler.run().await.unwrap_err();
        assert!(matches!(&*err, PipelineErrorKind::Crawl));
        assert_eq!(persistence.repository().count().await.unwrap(), 0);

        crawler.run().await.unwrap();
        assert_eq!(persistence.repository().count().await.unwrap(), 1);
    }
}
