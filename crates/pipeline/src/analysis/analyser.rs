use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A text recognition provider.
#[async_trait]
pub trait Analyser: Send + Sync {
    /// Stable identifier, stored with every image this provider analysed.
    fn identifier(&self) -> &str;

    /// How good the results are, in `[0.0, 1.0]`.
    fn quality(&self) -> f64;

    /// How many images this provider may analyse per month.
    /// `u64::MAX` means unlimited.
    fn monthly_capacity(&self) -> u64;

    /// Recognise text in an image. `Ok(None)` means there was none.
    async fn extract_text(&self, image: &[u8]) -> Result<Option<String>>;
}

pub type AnalyserHandle = Arc<dyn Analyser>;

/// Pseudo-provider standing for a person who typed the text in.
///
/// It exists so manually entered text carries an analyser id and a perfect
/// quality like any other analysis. It never recognises anything by itself
/// and is therefore never handed to the [`AnalysisJob`](super::AnalysisJob).
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualText;

impl ManualText {
    pub const IDENTIFIER: &'static str = "manual";
    pub const QUALITY: f64 = 1.0;
}

#[async_trait]
impl Analyser for ManualText {
    fn identifier(&self) -> &str {
        Self::IDENTIFIER
    }

    fn quality(&self) -> f64 {
        Self::QUALITY
    }

    fn monthly_capacity(&self) -> u64 {
        u64::MAX
    }

    async fn extract_text(&self, _image: &[u8]) -> Result<Option<String>> {
        Ok(None)
    }
}
