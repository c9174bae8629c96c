pub mod error;

use self::error::{ErrorKind, Result};
use crate::error::{ErrorKind as PipelineErrorKind, Result as PipelineResult};
use crate::persistence::{Attachment, Persistence};
use crate::source::ImageSource;
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use wisdom_cache::{Image, ImageId};

/// How many downloads [`backfill`] keeps in flight at once.
pub const MAX_BACKFILL_CONCURRENCY: usize = 16;

/// Progress events emitted by [`backfill`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`Discovered`](Self::Discovered) exactly once, with the number of
///    images lacking bytes.
/// 3. One of [`Downloaded`](Self::Downloaded), [`Merged`](Self::Merged) or
///    [`Deleted`](Self::Deleted) per image (or an `Err`).
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// Failing to list the images ends the stream early, without
/// [`Complete`](Self::Complete).
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillEvent {
    Started,
    Discovered(u64),
    /// The image got its bytes.
    Downloaded(Image),
    /// The bytes were already known; the image was folded into `into`.
    Merged { from: ImageId, into: Image },
    /// The bytes could not be downloaded, so the image was dropped.
    Deleted(Image),
    Complete,
}

/// Streams [`BackfillEvent`]s while fetching the bytes of every image that
/// has none yet.
///
/// Downloads run concurrently, up to [`MAX_BACKFILL_CONCURRENCY`] at a time.
/// A failure on one image is yielded as an `Err` item and does not stop the
/// others.
pub fn backfill<'a>(
    persistence: &'a Persistence,
    source: &'a dyn ImageSource,
) -> impl Stream<Item = PipelineResult<BackfillEvent>> + 'a {
    stream! {
        for await event in backfill_inner(persistence, source) {
            yield event.or_raise(|| PipelineErrorKind::Backfill);
        }
    }
}

fn backfill_inner<'a>(
    persistence: &'a Persistence,
    source: &'a dyn ImageSource,
) -> impl Stream<Item = Result<BackfillEvent>> + 'a {
    stream!({
        yield Ok(BackfillEvent::Started);

        let images = match persistence.repository().find_without_content_hash().await.or_raise(|| ErrorKind::Cache) {
            Ok(images) => images,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(BackfillEvent::Discovered(u64::try_from(images.len()).unwrap_or(u64::MAX)));

        let mut pending: Vec<_> = images.into_iter().map(|image| backfill_image(persistence, source, image)).collect();
        let mut downloading = FuturesUnordered::new();
        downloading.extend(pending.drain(..MAX_BACKFILL_CONCURRENCY.min(pending.len())));
        while let Some(result) = downloading.next().await {
            yield result;
            if !pending.is_empty() {
                downloading.push(pending.remove(0));
            }
        }

        yield Ok(BackfillEvent::Complete);
    })
}

async fn backfill_image(persistence: &Persistence, source: &dyn ImageSource, image: Image) -> Result<BackfillEvent> {
    let id = image.id;
    let data = match source.download(&image.url).await {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(%id, url = %image.url, error = ?err, "Could not download image; deleting it");
            persistence.delete(id).await.or_raise(|| ErrorKind::Persistence(id.0))?;
            return Ok(BackfillEvent::Deleted(image));
        },
    };
    match persistence.attach_data(id, &data).await.or_raise(|| ErrorKind::Persistence(id.0))? {
        Attachment::Attached(image) => Ok(BackfillEvent::Downloaded(image)),
        Attachment::Merged(into) => Ok(BackfillEvent::Merged { from: id, into }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, persistence};
    use wisdom_cache::NewImage;
    use wisdom_storage::content_hash;

    async fn collect(persistence: &Persistence, source: &FakeSource) -> Vec<BackfillEvent> {
        backfill(persistence, source).map(|event| event.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let (persistence, _blobs) = persistence().await;
        persistence.add("https://example.com/1", b"one").await.unwrap();
        let events = collect(&persistence, &FakeSource::new()).await;
        assert_eq!(events, vec![BackfillEvent::Started, BackfillEvent::Discovered(0), BackfillEvent::Complete]);
    }

    #[tokio::test]
    async fn test_downloads_merges_and_deletes() {
        let (persistence, _blobs) = persistence().await;
        let repo = persistence.repository();
        let fresh = repo.insert(&NewImage::new("https://example.com/fresh")).await.unwrap();
        let dupe = repo.insert(&NewImage::new("https://example.com/dupe")).await.unwrap();
        let gone = repo.insert(&NewImage::new("https://example.com/gone")).await.unwrap();
        persistence.add("https://example.com/known", b"known").await.unwrap();
        let source = FakeSource::new()
            .serving("https://example.com/fresh", b"fresh")
            .serving("https://example.com/dupe", b"known");

        let events = collect(&persistence, &source).await;
        assert_eq!(events.len(), 6);
        assert_eq!(events[0], BackfillEvent::Started);
        assert_eq!(events[1], BackfillEvent::Discovered(3));
        assert_eq!(events[5], BackfillEvent::Complete);

        let mut downloaded = false;
        let mut merged = false;
        let mut deleted = false;
        for event in &events[2..5] {
            match event {
                BackfillEvent::Downloaded(image) => {
                    assert_eq!(image.id, fresh.id);
                    assert_eq!(image.content_hash, Some(content_hash(b"fresh")));
                    downloaded = true;
                },
                BackfillEvent::Merged { from, into } => {
                    assert_eq!(*from, dupe.id);
                    assert_eq!(into.url, "https://example.com/dupe");
                    merged = true;
                },
                BackfillEvent::Deleted(image) => {
                    assert_eq!(image.id, gone.id);
                    deleted = true;
                },
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(downloaded && merged && deleted);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert!(repo.find_without_content_hash().await.unwrap().is_empty());
    }
}
