//! Domain models stored by the cache.

use derive_more::Display;
use time::UtcDateTime;

/// Database identity of an image.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(pub i64);

/// Database identity of a platform credential.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CredentialId(pub i64);

/// A stored image and everything known about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: ImageId,
    /// Where the image was originally downloaded from.
    pub url: String,
    /// Text recognised in the image, if any analyser found some.
    pub text: Option<String>,
    /// Identifier of the analyser that produced `text`.
    pub analyser: Option<String>,
    /// Quality of that analyser, in `[0.0, 1.0]`.
    pub analyser_quality: Option<f64>,
    pub created: UtcDateTime,
    pub updated: Option<UtcDateTime>,
    /// When `analyser` last produced a result for this image. Capacity
    /// windows are counted against this, not `created`.
    pub analysed: Option<UtcDateTime>,
    /// Hex BLAKE3 hash of the image bytes; `None` until they were fetched.
    pub content_hash: Option<String>,
}

impl Image {
    /// Whether the image carries any non-empty text.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|text| !text.is_empty())
    }

    /// Whether any analyser (the manual one included) has looked at it yet.
    pub fn is_analysed(&self) -> bool {
        self.analyser_quality.is_some()
    }

    /// Record the result of an analysis pass.
    pub fn set_analysis(
        &mut self,
        text: Option<String>,
        analyser: impl Into<String>,
        quality: f64,
        at: UtcDateTime,
    ) {
        self.text = text;
        self.analyser = Some(analyser.into());
        self.analyser_quality = Some(quality);
        self.analysed = Some(at);
    }
}

/// An image that has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub url: String,
    pub content_hash: Option<String>,
    pub text: Option<String>,
    pub analyser: Option<String>,
    pub analyser_quality: Option<f64>,
    pub created: UtcDateTime,
}

impl NewImage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_hash: None,
            text: None,
            analyser: None,
            analyser_quality: None,
            created: UtcDateTime::now(),
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_created(mut self, created: UtcDateTime) -> Self {
        self.created = created;
        self
    }

    pub fn with_analysis(mut self, text: Option<String>, analyser: impl Into<String>, quality: f64) -> Self {
        self.text = text;
        self.analyser = Some(analyser.into());
        self.analyser_quality = Some(quality);
        self
    }
}

/// A platform credential, known only by the hash of its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    pub token_hash: String,
}

impl Credential {
    /// Hash a raw platform token. The token itself is never persisted.
    pub fn hash_token(token: impl AsRef<[u8]>) -> String {
        blake3::hash(token.as_ref()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_text_ignores_empty_strings() {
        let mut image = NewImage::new("https://example.com/a");
        assert!(image.text.is_none());
        image.text = Some(String::new());
        let image = Image {
            id: ImageId(1),
            url: image.url,
            text: image.text,
            analyser: None,
            analyser_quality: None,
            created: image.created,
            updated: None,
            analysed: None,
            content_hash: None,
        };
        assert!(!image.has_text());
        assert!(!image.is_analysed());
    }

    #[test]
    fn test_token_hash_is_stable_and_opaque() {
        let hash = Credential::hash_token("123456:secret-bot-token");
        assert_eq!(hash, Credential::hash_token("123456:secret-bot-token"));
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("secret"));
    }
}
