//! Fixtures and fake collaborators shared by the unit tests.

use crate::analysis::{Analyser, AnalyserHandle};
use crate::error::{ErrorKind, Result};
use crate::persistence::Persistence;
use crate::platform::{Platform, UploadSource};
use crate::source::ImageSource;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wisdom_cache::{Database, Repository};
use wisdom_storage::BlobHandle;
use wisdom_storage::backend::MockBlobStore;

/// A migrated in-memory entity store.
pub async fn repository() -> Repository {
    let db = Database::connect_in_memory().await.unwrap();
    Repository::from(&db)
}

pub async fn persistence_with(blobs: BlobHandle) -> Persistence {
    Persistence::new(repository().await, blobs)
}

/// A fresh [`Persistence`] plus direct access to its blob store.
pub async fn persistence() -> (Persistence, Arc<MockBlobStore>) {
    let blobs = Arc::new(MockBlobStore::default());
    let persistence = persistence_with(Arc::clone(&blobs) as BlobHandle).await;
    (persistence, blobs)
}

pub struct FakeAnalyser {
    identifier: String,
    quality: f64,
    capacity: u64,
    text: Option<String>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeAnalyser {
    pub fn new(identifier: &str, quality: f64, capacity: u64) -> Self {
        Self {
            identifier: identifier.to_string(),
            quality,
            capacity,
            text: None,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn handle(identifier: &str, quality: f64, capacity: u64) -> AnalyserHandle {
        Arc::new(Self::new(identifier, quality, capacity))
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Counter of `extract_text` calls, still readable after the analyser
    /// has been moved into a job.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Analyser for FakeAnalyser {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn quality(&self) -> f64 {
        self.quality
    }

    fn monthly_capacity(&self) -> u64 {
        self.capacity
    }

    async fn extract_text(&self, _image: &[u8]) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            exn::bail!(ErrorKind::Analyser);
        }
        Ok(self.text.clone())
    }
}

/// Hands out scripted URLs and serves bytes from a fixed map. Downloading a
/// URL that is not in the map fails.
#[derive(Default)]
pub struct FakeSource {
    urls: Mutex<VecDeque<String>>,
    images: HashMap<String, Vec<u8>>,
    downloads: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a URL to be generated, and serve `data` for it.
    pub fn with_image(mut self, url: &str, data: &[u8]) -> Self {
        self.images.insert(url.to_string(), data.to_vec());
        self.with_url(url)
    }

    /// Queue a URL to be generated without serving anything for it.
    pub fn with_url(self, url: &str) -> Self {
        self.urls.lock().unwrap().push_back(url.to_string());
        self
    }

    /// Serve `data` for `url` without ever generating it.
    pub fn serving(mut self, url: &str, data: &[u8]) -> Self {
        self.images.insert(url.to_string(), data.to_vec());
        self
    }

    /// Fail the first `n` downloads whatever the URL.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn generate_url(&self) -> Result<String> {
        let next = self.urls.lock().unwrap().pop_front();
        match next {
            Some(url) => Ok(url),
            None => exn::bail!(ErrorKind::Source),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            exn::bail!(ErrorKind::Source);
        }
        match self.images.get(url) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::Source),
        }
    }
}

/// Records every upload and answers with `<prefix>-<n>-small`/`-large`
/// handles.
pub struct FakePlatform {
    token: String,
    fail: bool,
    empty: bool,
    rejected: Option<Vec<u8>>,
    uploads: Mutex<Vec<(Vec<u8>, Option<String>)>>,
}

impl FakePlatform {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            fail: false,
            empty: false,
            rejected: None,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Fail every upload of exactly these bytes.
    pub fn rejecting(mut self, data: &[u8]) -> Self {
        self.rejected = Some(data.to_vec());
        self
    }

    /// Succeed without issuing any handle.
    pub fn issuing_nothing(mut self) -> Self {
        self.empty = true;
        self
    }

    /// Every upload so far: the bytes and the caption.
    pub fn uploads(&self) -> Vec<(Vec<u8>, Option<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn token(&self) -> &str {
        &self.token
    }

    async fn upload(&self, source: UploadSource, caption: Option<&str>) -> Result<Vec<String>> {
        if self.fail {
            exn::bail!(ErrorKind::Platform);
        }
        let UploadSource::Bytes(data) = source else {
            exn::bail!(ErrorKind::Platform);
        };
        if self.rejected.as_ref() == Some(&data) {
            exn::bail!(ErrorKind::Platform);
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((data, caption.map(str::to_string)));
        if self.empty {
            return Ok(Vec::new());
        }
        let n = uploads.len();
        Ok(vec![format!("{}-{n}-small", self.token), format!("{}-{n}-large", self.token)])
    }
}
