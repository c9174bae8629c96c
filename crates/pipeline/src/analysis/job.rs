use super::error::{ErrorKind, Result};
use super::{AnalyserHandle, ManualText, NonOptimalQueue, select_analyser, target_quality};
use crate::error::ErrorKind as PipelineErrorKind;
use crate::persistence::Persistence;
use crate::worker::{Cycle, Job};
use async_trait::async_trait;
use exn::ResultExt;
use std::time::Duration;
use time::UtcDateTime;
use tracing::instrument;
use wisdom_cache::Image;
use wisdom_config::AnalysisConfig;

/// Whether analysing `image` at `quality` would be an improvement.
fn improves(image: &Image, quality: f64) -> bool {
    image.analyser_quality.is_none_or(|current| quality > current)
}

/// Apply a provider's result to an image.
///
/// An empty (or whitespace-only) result never wipes text that is already
/// there, but the analyser, its quality and the analysis time are always
/// recorded.
pub fn merge_analysis(image: &mut Image, text: Option<String>, analyser: &str, quality: f64, at: UtcDateTime) {
    let text = match text.filter(|text| !text.trim().is_empty()) {
        Some(text) => Some(text),
        None => image.text.take(),
    };
    image.set_analysis(text, analyser, quality, at);
}

/// Periodic job that upgrades one image's analysis per cycle.
pub struct AnalysisJob {
    persistence: Persistence,
    analysers: Vec<AnalyserHandle>,
    queue: NonOptimalQueue,
    idle_backoff: Duration,
    starved_backoff: Duration,
}

impl AnalysisJob {
    /// Returns `None` (and logs a warning) when there is no provider to run,
    /// in which case no analysis worker should be started at all.
    pub fn new(persistence: Persistence, analysers: Vec<AnalyserHandle>, config: &AnalysisConfig) -> Option<Self> {
        let analysers: Vec<_> = analysers
            .into_iter()
            .filter(|analyser| {
                let manual = analyser.identifier() == ManualText::IDENTIFIER;
                if manual {
                    tracing::warn!("Manual text is not an automatic analyser; ignoring it");
                }
                !manual
            })
            .collect();
        let Some(target) = target_quality(&analysers) else {
            tracing::warn!("No image analyser provided; analysis will not run");
            return None;
        };
        let queue = NonOptimalQueue::new(persistence.repository().clone(), target, config.batch_size);
        Some(Self {
            persistence,
            analysers,
            queue,
            idle_backoff: config.idle_backoff,
            starved_backoff: config.starved_backoff,
        })
    }

    /// Handle to the work queue, e.g. to prioritise an image.
    pub fn queue(&self) -> NonOptimalQueue {
        self.queue.clone()
    }

    pub fn target_quality(&self) -> f64 {
        self.queue.target_quality()
    }

    #[instrument(level = "debug", name = "analysis", skip_all)]
    async fn cycle(&self) -> Result<Cycle> {
        let Some(id) = self.queue.pop().await? else {
            tracing::debug!("Every image is at target quality");
            return Ok(Cycle::Backoff(self.idle_backoff));
        };
        let now = UtcDateTime::now();
        let Some(analyser) = select_analyser(&self.analysers, self.persistence.repository(), now).await? else {
            tracing::debug!(%id, "No analyser has capacity left");
            self.queue.prioritise(id).await;
            return Ok(Cycle::Backoff(self.starved_backoff));
        };
        let Some(image) = self.persistence.get(id).await.or_raise(|| ErrorKind::Persistence)? else {
            tracing::debug!(%id, "Image disappeared before it could be analysed");
            return Ok(Cycle::Worked);
        };
        let (name, quality) = (analyser.identifier().to_string(), analyser.quality());
        if !improves(&image, quality) {
            tracing::debug!(%id, analyser = %name, current = ?image.analyser_quality, quality, "Would not improve analysis");
            return Ok(Cycle::Worked);
        }
        let Some(data) = self.persistence.image_data(&image).await.or_raise(|| ErrorKind::Persistence)? else {
            tracing::debug!(%id, "No image data; not analysing");
            return Ok(Cycle::Worked);
        };

        let text = analyser
            .extract_text(&data)
            .await
            .or_raise(|| ErrorKind::Analyser(name.clone()))?;
        let previous = image.analyser_quality;
        let image = self
            .persistence
            .modify(id, |image| {
                // Someone else may have analysed it in the meantime.
                if improves(image, quality) {
                    merge_analysis(image, text, &name, quality, now);
                }
            })
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        tracing::info!(
            %id,
            analyser = %name,
            previous = ?previous,
            quality,
            text = image.text.as_deref().unwrap_or_default(),
            "Analysis updated"
        );
        Ok(Cycle::Worked)
    }
}

#[async_trait]
impl Job for AnalysisJob {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn run(&mut self) -> crate::error::Result<Cycle> {
        self.cycle().await.or_raise(|| PipelineErrorKind::Analysis)
    }
}
