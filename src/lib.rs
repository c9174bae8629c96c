//! Harvest generated images, recognise the text in them and keep them
//! uploaded to a messaging platform, so a delivery layer can answer queries
//! with cached platform handles.
//!
//! [`Runtime`] wires the pieces together from a [`Config`]: one SQLite entity
//! store, one blob tree, one [`Persistence`] facade on top of both, and a
//! [`Worker`] for each of the crawler, the analysis job and the uploader.
//! Which workers exist depends on the [`Collaborators`] handed in.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::absolute;
use std::sync::Arc;
use wisdom_cache::{Database, Repository};
use wisdom_pipeline::analysis::{AnalyserHandle, AnalysisJob, NonOptimalQueue};
use wisdom_pipeline::crawl::Crawler;
use wisdom_pipeline::platform::PlatformHandle;
use wisdom_pipeline::source::SourceHandle;
use wisdom_pipeline::upload::Uploader;
use wisdom_pipeline::worker::{Job, Worker, WorkerState};
use wisdom_storage::BlobHandle;
use wisdom_storage::backend::LocalBlobStore;

pub use wisdom_cache::{Credential, Image, ImageId};
pub use wisdom_config::Config;
pub use wisdom_pipeline::{AddOutcome, Attachment, BackfillEvent, Delivery, Persistence, Stats, backfill};

/// Name the blob store is logged under.
const BLOB_STORE_NAME: &str = "images";

/// The external services the pipeline talks to. Anything left out disables
/// the workers that depend on it.
#[derive(Default, Clone)]
pub struct Collaborators {
    /// Needed by the crawler; also lets the uploader re-download lost bytes.
    pub source: Option<SourceHandle>,
    /// Needed by the uploader.
    pub platform: Option<PlatformHandle>,
    /// Needed by the analysis job.
    pub analysers: Vec<AnalyserHandle>,
}

impl Collaborators {
    /// Use the HTTP generator configured in `source.endpoint`, if any.
    #[cfg(feature = "http")]
    pub fn with_http_source(mut self, config: &wisdom_config::SourceConfig) -> Result<Self> {
        if let Some(endpoint) = &config.endpoint {
            let source = wisdom_pipeline::source::HttpImageSource::new(endpoint.as_str(), config.timeout)
                .or_raise(|| ErrorKind::Source)?;
            self.source = Some(Arc::new(source));
        }
        Ok(self)
    }
}

/// All stores and workers of one running instance.
pub struct Runtime {
    database: Database,
    persistence: Persistence,
    crawler: Option<Worker<Crawler>>,
    analysis: Option<Worker<AnalysisJob>>,
    analysis_queue: Option<NonOptimalQueue>,
    uploader: Option<Worker<Uploader>>,
}

impl Runtime {
    /// Open the stores named in `config` and set up (but do not start) the
    /// workers.
    pub async fn build(config: &Config, collaborators: Collaborators) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;

        let database_path = absolute(&config.persistence.database).or_raise(|| ErrorKind::Database)?;
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        let database = Database::connect(&database_path).await.or_raise(|| ErrorKind::Database)?;

        let blobs_path = absolute(&config.persistence.blobs).or_raise(|| ErrorKind::Storage)?;
        let blobs = LocalBlobStore::new(BLOB_STORE_NAME, &blobs_path).or_raise(|| ErrorKind::Storage)?;
        tracing::info!(
            database = %database_path.display(),
            blobs = %blobs_path.display(),
            "Stores opened"
        );

        Ok(Self::with_stores(config, database, Arc::new(blobs), collaborators).await)
    }

    /// Set up the workers on top of already opened stores.
    pub async fn with_stores(
        config: &Config,
        database: Database,
        blobs: BlobHandle,
        collaborators: Collaborators,
    ) -> Self {
        let persistence = Persistence::new(Repository::from(&database), blobs);
        persistence.refresh_stats().await;
        let Collaborators { source, platform, analysers } = collaborators;

        let crawler = match (&source, config.crawler.enabled) {
            (Some(source), true) => Some(Worker::new(
                Crawler::new(persistence.clone(), source.clone(), &config.crawler),
                config.crawler.interval,
            )),
            (None, true) => {
                tracing::warn!("No image source provided; crawler will not run");
                None
            },
            (_, false) => None,
        };

        let (analysis, analysis_queue) = if config.analysis.enabled {
            match AnalysisJob::new(persistence.clone(), analysers, &config.analysis) {
                Some(job) => {
                    let queue = job.queue();
                    (Some(Worker::new(job, config.analysis.interval)), Some(queue))
                },
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let uploader = match (platform, config.uploader.enabled) {
            (Some(platform), true) => Some(Worker::new(
                Uploader::new(persistence.clone(), platform, source, &config.uploader),
                config.uploader.interval,
            )),
            (None, true) => {
                tracing::warn!("No platform provided; uploader will not run");
                None
            },
            (_, false) => None,
        };

        Self { database, persistence, crawler, analysis, analysis_queue, uploader }
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// The analysis work queue, e.g. to have an image re-analysed next.
    /// `None` when the analysis job does not exist.
    pub fn analysis_queue(&self) -> Option<&NonOptimalQueue> {
        self.analysis_queue.as_ref()
    }

    /// Name and state of every worker that exists.
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        let mut states = Vec::new();
        collect_state(&self.crawler, &mut states);
        collect_state(&self.analysis, &mut states);
        collect_state(&self.uploader, &mut states);
        states
    }

    /// Start every worker. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if let Some(worker) = &mut self.crawler {
            worker.start();
        }
        if let Some(worker) = &mut self.analysis {
            worker.start();
        }
        if let Some(worker) = &mut self.uploader {
            worker.start();
        }
        tracing::info!(workers = self.worker_states().len(), "Pipeline started");
    }

    /// Stop every worker and wait for running cycles to finish. The runtime
    /// can be started again afterwards.
    pub async fn stop(&mut self) {
        // Signal everyone before waiting on anyone.
        if let Some(worker) = &self.crawler {
            worker.stop();
        }
        if let Some(worker) = &self.analysis {
            worker.stop();
        }
        if let Some(worker) = &self.uploader {
            worker.stop();
        }
        if let Some(worker) = &mut self.crawler {
            worker.join().await;
        }
        if let Some(worker) = &mut self.analysis {
            worker.join().await;
        }
        if let Some(worker) = &mut self.uploader {
            worker.join().await;
        }
        tracing::info!("Pipeline stopped");
    }

    /// Stop every worker, then close the database.
    pub async fn shutdown(mut self) {
        self.stop().await;
        self.database.close().await;
    }
}

fn collect_state<J: Job>(worker: &Option<Worker<J>>, states: &mut Vec<(String, WorkerState)>) {
    if let Some(worker) = worker {
        states.push((worker.name().to_string(), worker.state()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wisdom_pipeline::analysis::Analyser;
    use wisdom_pipeline::source::ImageSource;

    /// Generates `https://example.com/<n>` and serves `image <n>` for it.
    #[derive(Default)]
    struct CountingSource {
        next: AtomicUsize,
    }

    #[async_trait]
    impl ImageSource for CountingSource {
        async fn generate_url(&self) -> wisdom_pipeline::error::Result<String> {
            Ok(format!("https://example.com/{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn download(&self, url: &str) -> wisdom_pipeline::error::Result<Vec<u8>> {
            let n = url.rsplit('/').next().unwrap_or_default();
            Ok(format!("image {n}").into_bytes())
        }
    }

    struct Shouting;

    #[async_trait]
    impl Analyser for Shouting {
        fn identifier(&self) -> &str {
            "shouting"
        }

        fn quality(&self) -> f64 {
            0.5
        }

        fn monthly_capacity(&self) -> u64 {
            u64::MAX
        }

        async fn extract_text(&self, image: &[u8]) -> wisdom_pipeline::error::Result<Option<String>> {
            Ok(Some(String::from_utf8_lossy(image).to_uppercase()))
        }
    }

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.persistence.database = dir.path().join("db").join("wisdom.db");
        config.persistence.blobs = dir.path().join("images");
        config.crawler.interval = Duration::from_millis(20);
        config.analysis.interval = Duration::from_millis(20);
        // The analysis queue starts out empty; retry quickly once images arrive.
        config.analysis.idle_backoff = Duration::from_millis(10);
        config.analysis.starved_backoff = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn test_build_without_collaborators_has_no_workers() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::build(&config(&dir), Collaborators::default()).await.unwrap();
        assert!(runtime.worker_states().is_empty());
        assert!(runtime.analysis_queue().is_none());
        assert!(dir.path().join("db").join("wisdom.db").is_file());
        assert!(dir.path().join("images").is_dir());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.uploader.interval = Duration::ZERO;
        let err = Runtime::build(&config, Collaborators::default()).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Config));
    }

    #[tokio::test]
    async fn test_disabled_workers_are_not_built() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.crawler.enabled = false;
        let collaborators = Collaborators {
            source: Some(Arc::new(CountingSource::default())),
            analysers: vec![Arc::new(Shouting)],
            ..Collaborators::default()
        };
        let runtime = Runtime::build(&config, collaborators).await.unwrap();
        let names: Vec<_> = runtime.worker_states().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["analysis".to_string()]);
        assert_eq!(runtime.analysis_queue().map(NonOptimalQueue::target_quality), Some(0.5));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_pipeline_crawls_and_analyses() {
        let dir = tempfile::tempdir().unwrap();
        let collaborators = Collaborators {
            source: Some(Arc::new(CountingSource::default())),
            analysers: vec![Arc::new(Shouting)],
            ..Collaborators::default()
        };
        let mut runtime = Runtime::build(&config(&dir), collaborators).await.unwrap();
        let mut stats = runtime.persistence().subscribe_stats();
        runtime.start();
        assert!(runtime.worker_states().iter().all(|(_, state)| *state != WorkerState::Idle));

        tokio::time::timeout(Duration::from_secs(10), stats.wait_for(|stats| stats.with_text >= 2))
            .await
            .unwrap()
            .unwrap();
        runtime.stop().await;
        assert!(runtime.worker_states().iter().all(|(_, state)| *state == WorkerState::Idle));

        let analysed = runtime.persistence().repository().find_by_text("image", None, 0).await.unwrap();
        assert!(analysed.len() >= 2);
        assert!(analysed.iter().all(|image| image.analyser.as_deref() == Some("shouting")));
        runtime.shutdown().await;
    }
}
