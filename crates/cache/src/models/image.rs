use crate::error::{Error, ErrorKind};
use crate::image::{Image, ImageId};
use exn::ResultExt;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct ImageRow {
    pub(crate) id: i64,
    pub(crate) url: String,
    pub(crate) text: Option<String>,
    pub(crate) analyser: Option<String>,
    pub(crate) analyser_quality: Option<f64>,
    pub(crate) created: i64,
    pub(crate) updated: Option<i64>,
    pub(crate) analysed: Option<i64>,
    pub(crate) content_hash: Option<String>,
}

pub(crate) fn check_quality(quality: Option<f64>) -> Result<Option<f64>, Error> {
    match quality {
        Some(q) if !(0.0..=1.0).contains(&q) => exn::bail!(ErrorKind::InvalidData("analyser quality")),
        quality => Ok(quality),
    }
}

fn timestamp(seconds: i64, field: &'static str) -> Result<UtcDateTime, Error> {
    UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData(field))
}

impl From<&Image> for ImageRow {
    fn from(image: &Image) -> Self {
        Self {
            id: image.id.0,
            url: image.url.clone(),
            text: image.text.clone(),
            analyser: image.analyser.clone(),
            analyser_quality: image.analyser_quality,
            created: image.created.unix_timestamp(),
            updated: image.updated.map(UtcDateTime::unix_timestamp),
            analysed: image.analysed.map(UtcDateTime::unix_timestamp),
            content_hash: image.content_hash.clone(),
        }
    }
}

impl TryFrom<ImageRow> for Image {
    type Error = Error;
    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ImageId(row.id),
            url: row.url,
            text: row.text,
            analyser: row.analyser,
            analyser_quality: check_quality(row.analyser_quality)?,
            created: timestamp(row.created, "created date")?,
            updated: row.updated.map(|t| timestamp(t, "updated date")).transpose()?,
            analysed: row.analysed.map(|t| timestamp(t, "analysis date")).transpose()?,
            content_hash: row.content_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ImageRow {
        ImageRow {
            id: 7,
            url: "https://example.com/wisdom/7".to_string(),
            text: Some("believe in yourself".to_string()),
            analyser: Some("tesseract".to_string()),
            analyser_quality: Some(0.4),
            created: 1_700_000_000,
            updated: None,
            analysed: Some(1_700_000_100),
            content_hash: Some("af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string()),
        }
    }

    #[test]
    fn test_row_to_model() {
        let image = Image::try_from(row()).unwrap();
        assert_eq!(image.id, ImageId(7));
        assert_eq!(image.created.unix_timestamp(), 1_700_000_000);
        assert_eq!(image.analysed.map(UtcDateTime::unix_timestamp), Some(1_700_000_100));
        assert!(image.updated.is_none());
    }

    #[test]
    fn test_model_to_row_strips_nanoseconds() {
        let mut image = Image::try_from(row()).unwrap();
        let now = UtcDateTime::now();
        image.updated = Some(now);
        let row = ImageRow::from(&image);
        let back = Image::try_from(row).unwrap();
        assert_eq!(back.updated, Some(now.replace_nanosecond(0).unwrap()));
    }

    #[test]
    fn test_quality_out_of_range_is_invalid() {
        let mut row = row();
        row.analyser_quality = Some(1.5);
        let err = Image::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("analyser quality")));
    }
}
