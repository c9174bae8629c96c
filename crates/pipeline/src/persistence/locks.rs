use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use wisdom_cache::ImageId;

/// Number of stripes; rows whose ids are congruent modulo this share a lock.
pub(crate) const STRIPES: usize = 64;

/// Striped per-row locks guarding read-modify-write of image rows.
#[derive(Clone)]
pub(crate) struct RowLocks {
    stripes: Arc<[Mutex<()>]>,
}

impl RowLocks {
    pub(crate) fn new() -> Self {
        Self { stripes: (0..STRIPES).map(|_| Mutex::new(())).collect() }
    }

    pub(crate) async fn lock(&self, id: ImageId) -> MutexGuard<'_, ()> {
        self.stripes[Self::stripe(id)].lock().await
    }

    fn stripe(id: ImageId) -> usize {
        // `rem_euclid` keeps the index in range for negative ids as well.
        id.0.rem_euclid(STRIPES as i64) as usize
    }
}
