use super::error::{ErrorKind, Result};
use exn::ResultExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use wisdom_cache::{ImageId, Repository};

/// Working set of images that could use a better analysis.
///
/// Ids are pulled from the entity store in batches and handed out one at a
/// time; the store is only queried again once the working set runs dry.
/// Clones share the same working set.
#[derive(Clone)]
pub struct NonOptimalQueue {
    repo: Repository,
    target_quality: f64,
    batch_size: usize,
    ids: Arc<Mutex<VecDeque<ImageId>>>,
}

impl NonOptimalQueue {
    pub fn new(repo: Repository, target_quality: f64, batch_size: usize) -> Self {
        Self {
            repo,
            target_quality,
            batch_size: batch_size.max(1),
            ids: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn target_quality(&self) -> f64 {
        self.target_quality
    }

    /// Next candidate, refilling from the store if necessary. `None` means
    /// every image is already at target quality.
    pub async fn pop(&self) -> Result<Option<ImageId>> {
        let mut ids = self.ids.lock().await;
        if ids.is_empty() {
            let batch = self
                .repo
                .find_non_optimal(self.target_quality, self.batch_size)
                .await
                .or_raise(|| ErrorKind::Cache)?;
            tracing::trace!(candidates = batch.len(), "Refilled analysis queue");
            ids.extend(batch);
        }
        Ok(ids.pop_front())
    }

    /// Put an image at the front of the queue so it is analysed next.
    pub async fn prioritise(&self, id: ImageId) {
        let mut ids = self.ids.lock().await;
        ids.retain(|queued| *queued != id);
        ids.push_front(id);
    }

    /// Number of ids currently held in the working set.
    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }
}
