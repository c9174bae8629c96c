//! Repository for images, credentials and upload handles.
//!
//! Upload handles are meaningless without the image they were issued for and
//! the credential they were issued under, so all three live behind the same
//! repository.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::image::{Credential, CredentialId, Image, ImageId, NewImage};
use crate::models::{ImageRow, check_quality};
use exn::{OptionExt, ResultExt};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::UtcDateTime;

/// Page size used by [`Repository::find_by_text`] when none is given.
pub const DEFAULT_TEXT_SEARCH_LIMIT: usize = 16;

fn to_i64(n: usize, what: &'static str) -> Result<i64> {
    i64::try_from(n).or_raise(|| ErrorKind::InvalidData(what))
}

fn to_u64(n: i64) -> Result<u64> {
    u64::try_from(n).or_raise(|| ErrorKind::InvalidData("count"))
}

fn into_images(rows: Vec<ImageRow>) -> Result<Vec<Image>> {
    rows.into_iter().map(Image::try_from).collect()
}

/// Repository for managing images and their upload handles.
///
/// # Relationships
///
/// - An image has at most one content hash, and no two images share one
/// - An image has many upload handles; each handle belongs to one image
/// - A handle is linked to every credential it is valid for
/// - Deleting an image cascades to its handles and their credential links
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert/Update
    // =========================================================================

    /// Insert a new image and return it with its assigned id.
    ///
    /// An image inserted with analysis results counts as analysed at its
    /// creation time. Inserting a content hash that is already taken fails
    /// with [`ErrorKind::Database`].
    pub async fn insert(&self, image: &NewImage) -> Result<Image> {
        check_quality(image.analyser_quality)?;
        let created = image.created.unix_timestamp();
        let row: ImageRow = sqlx::query_as(include_str!("../queries/insert_image.sql"))
            .bind(image.url.as_str())
            .bind(image.text.as_deref())
            .bind(image.analyser.as_deref())
            .bind(image.analyser_quality)
            .bind(created)
            .bind(None::<i64>)
            .bind(image.analyser_quality.map(|_| created))
            .bind(image.content_hash.as_deref())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let image = Image::try_from(row)?;
        tracing::debug!(id = %image.id, url = %image.url, "Image inserted");
        Ok(image)
    }

    /// Write every mutable field of an existing image back to the database.
    ///
    /// The `updated` timestamp is set here; whatever the caller put in it is
    /// ignored. Returns [`ErrorKind::ImageNotFound`] if the id has no row.
    pub async fn update(&self, image: &Image) -> Result<Image> {
        check_quality(image.analyser_quality)?;
        let row = ImageRow::from(image);
        let updated: Option<ImageRow> = sqlx::query_as(include_str!("../queries/update_image.sql"))
            .bind(row.url)
            .bind(row.text)
            .bind(row.analyser)
            .bind(row.analyser_quality)
            .bind(UtcDateTime::now().unix_timestamp())
            .bind(row.analysed)
            .bind(row.content_hash)
            .bind(row.id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        updated.ok_or_raise(|| ErrorKind::ImageNotFound(image.id.0))?.try_into()
    }

    // =========================================================================
    // Get/Find
    // =========================================================================

    pub async fn get(&self, id: ImageId) -> Result<Option<Image>> {
        let row: Option<ImageRow> = sqlx::query_as(include_str!("../queries/get_by_id.sql"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Image::try_from).transpose()
    }

    /// All images downloaded from `url`. Sources commonly serve different
    /// images from the same URL, so there may be many.
    pub async fn find_by_url(&self, url: impl AsRef<str>) -> Result<Vec<Image>> {
        let rows: Vec<ImageRow> = sqlx::query_as(include_str!("../queries/get_by_url.sql"))
            .bind(url.as_ref())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        into_images(rows)
    }

    pub async fn find_by_content_hash(&self, hash: impl AsRef<str>) -> Result<Option<Image>> {
        let row: Option<ImageRow> = sqlx::query_as(include_str!("../queries/get_by_content_hash.sql"))
            .bind(hash.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Image::try_from).transpose()
    }

    /// The image a platform upload handle was issued for, under any credential.
    pub async fn find_by_upload_handle(&self, handle: impl AsRef<str>) -> Result<Option<Image>> {
        let row: Option<ImageRow> = sqlx::query_as(include_str!("../queries/get_by_upload_handle.sql"))
            .bind(handle.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Image::try_from).transpose()
    }

    /// Images whose text contains every whitespace-separated word of `query`,
    /// compared case-insensitively, oldest id first.
    ///
    /// `limit` defaults to [`DEFAULT_TEXT_SEARCH_LIMIT`]. An empty query
    /// matches every image that has text.
    pub async fn find_by_text(&self, query: &str, limit: Option<usize>, offset: usize) -> Result<Vec<Image>> {
        let limit = limit.unwrap_or(DEFAULT_TEXT_SEARCH_LIMIT);
        // SQLite's lower() only folds ASCII, so words are matched here.
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let rows: Vec<ImageRow> = sqlx::query_as(include_str!("../queries/with_text.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let matching = rows
            .into_iter()
            .filter(|row| {
                let text = row.text.as_deref().unwrap_or_default().to_lowercase();
                words.iter().all(|word| text.contains(word.as_str()))
            })
            .skip(offset)
            .take(limit)
            .collect();
        into_images(matching)
    }

    /// Up to `count` images picked uniformly at random.
    pub async fn random(&self, count: usize) -> Result<Vec<Image>> {
        let rows: Vec<ImageRow> = sqlx::query_as(include_str!("../queries/random.sql"))
            .bind(to_i64(count, "count")?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        into_images(rows)
    }

    pub async fn random_one(&self) -> Result<Option<Image>> {
        Ok(self.random(1).await?.into_iter().next())
    }

    /// Ids of images worth (re-)analysing, best candidates first.
    ///
    /// Never-analysed images come before images analysed below
    /// `target_quality`. Within each tier, images without any text go first,
    /// then the oldest. Images without a content hash have no bytes to analyse
    /// and are never returned.
    pub async fn find_non_optimal(&self, target_quality: f64, limit: usize) -> Result<Vec<ImageId>> {
        let mut ids: Vec<(i64,)> = sqlx::query_as(include_str!("../queries/non_optimal_unanalysed.sql"))
            .bind(to_i64(limit, "limit")?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if ids.len() < limit {
            let below: Vec<(i64,)> = sqlx::query_as(include_str!("../queries/non_optimal_below_target.sql"))
                .bind(target_quality)
                .bind(to_i64(limit - ids.len(), "limit")?)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            ids.extend(below);
        }
        Ok(ids.into_iter().map(|(id,)| ImageId(id)).collect())
    }

    /// The oldest image that has no upload handle valid for `credential`,
    /// leaving out the images in `skip`.
    pub async fn find_without_upload(&self, credential: CredentialId, skip: &[ImageId]) -> Result<Option<Image>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT i.* FROM images i WHERE NOT EXISTS (\
                SELECT 1 FROM upload_handles h \
                INNER JOIN upload_handle_credentials c ON c.handle = h.handle \
                WHERE h.image_id = i.id AND c.credential_id = ",
        );
        builder.push_bind(credential.0).push(")");
        if !skip.is_empty() {
            builder.push(" AND i.id NOT IN (");
            let mut ids = builder.separated(", ");
            for id in skip {
                ids.push_bind(id.0);
            }
            ids.push_unseparated(")");
        }
        builder.push(" ORDER BY i.created ASC, i.id ASC LIMIT 1");
        let row: Option<ImageRow> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Image::try_from).transpose()
    }

    /// Every image whose bytes have never been fetched, oldest first.
    pub async fn find_without_content_hash(&self) -> Result<Vec<Image>> {
        let rows: Vec<ImageRow> = sqlx::query_as(include_str!("../queries/without_content_hash.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        into_images(rows)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    async fn count_from(&self, sql: &'static str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(sql)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        to_u64(count)
    }

    pub async fn count(&self) -> Result<u64> {
        self.count_from(include_str!("../queries/count.sql")).await
    }

    pub async fn count_with_text(&self) -> Result<u64> {
        self.count_from(include_str!("../queries/count_with_text.sql")).await
    }

    pub async fn count_with_content_hash(&self) -> Result<u64> {
        self.count_from(include_str!("../queries/count_with_content_hash.sql")).await
    }

    /// Number of images currently attributed to each analyser, by analyser id.
    pub async fn count_by_analyser(&self) -> Result<Vec<(String, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/count_by_analyser.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|(analyser, count)| Ok((analyser, to_u64(count)?))).collect()
    }

    /// Number of images `analyser` produced a result for at or after `since`.
    pub async fn count_by_analyser_since(&self, analyser: &str, since: UtcDateTime) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_by_analyser_since.sql"))
            .bind(analyser)
            .bind(since.unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        to_u64(count)
    }

    /// Number of distinct images with at least one handle valid for `credential`.
    pub async fn count_with_upload(&self, credential: CredentialId) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_with_upload_for_credential.sql"))
            .bind(credential.0)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        to_u64(count)
    }

    // =========================================================================
    // Credentials & Upload Handles
    // =========================================================================

    /// Look up the credential for a raw platform token, creating it on first use.
    pub async fn credential_for_token(&self, token: impl AsRef<[u8]>) -> Result<Credential> {
        let (id, token_hash): (i64, String) = sqlx::query_as(include_str!("../queries/upsert_credential.sql"))
            .bind(Credential::hash_token(token))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Credential { id: CredentialId(id), token_hash })
    }

    /// Record platform handles issued for `image` under `credential`.
    ///
    /// Re-adding a known handle only links it to the credential. A handle
    /// that already belongs to a different image is left alone.
    pub async fn add_upload_handles(
        &self,
        image: ImageId,
        credential: CredentialId,
        handles: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for handle in handles {
            sqlx::query(include_str!("../queries/insert_upload_handle.sql"))
                .bind(handle.as_str())
                .bind(image.0)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let (owner,): (i64,) = sqlx::query_as(include_str!("../queries/upload_handle_owner.sql"))
                .bind(handle.as_str())
                .fetch_one(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if owner != image.0 {
                tracing::warn!(%handle, %image, owner, "Upload handle already belongs to another image");
                continue;
            }
            sqlx::query(include_str!("../queries/link_upload_handle.sql"))
                .bind(handle.as_str())
                .bind(credential.0)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Handles for `image` that are valid under `credential`, in the order
    /// they were recorded.
    pub async fn upload_handles(&self, image: ImageId, credential: CredentialId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/upload_handles_for_credential.sql"))
            .bind(image.0)
            .bind(credential.0)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(handle,)| handle).collect())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete an image along with its upload handles. Returns whether a row
    /// was actually removed.
    pub async fn delete(&self, id: ImageId) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_by_id.sql"))
            .bind(id.0)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every image. Credentials are kept.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }
}
