use super::AnalyserHandle;
use super::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use time::{Duration, UtcDateTime};
use wisdom_cache::Repository;

/// Usage is counted over this trailing window rather than a calendar month.
pub const CAPACITY_WINDOW: Duration = Duration::days(31);

/// The quality every image should eventually be analysed at: the best any
/// enabled provider can do. `None` without providers.
pub fn target_quality(analysers: &[AnalyserHandle]) -> Option<f64> {
    analysers.iter().map(|analyser| analyser.quality()).max_by(f64::total_cmp)
}

/// Pick the provider to use right now.
///
/// A single provider is always used, capacity or not. Otherwise providers
/// without remaining capacity are skipped and the best quality wins, ties
/// going to whichever has the most capacity left.
pub async fn select_analyser(
    analysers: &[AnalyserHandle],
    repo: &Repository,
    now: UtcDateTime,
) -> Result<Option<AnalyserHandle>> {
    if let [only] = analysers {
        return Ok(Some(Arc::clone(only)));
    }
    let since = now - CAPACITY_WINDOW;
    let mut best: Option<(&AnalyserHandle, u64)> = None;
    for analyser in analysers {
        let remaining = remaining_capacity(analyser, repo, since).await?;
        if remaining == 0 {
            tracing::trace!(analyser = analyser.identifier(), "No capacity left");
            continue;
        }
        let better = best.is_none_or(|(current, current_remaining)| {
            analyser
                .quality()
                .total_cmp(&current.quality())
                .then(remaining.cmp(&current_remaining))
                .is_gt()
        });
        if better {
            best = Some((analyser, remaining));
        }
    }
    Ok(best.map(|(analyser, _)| Arc::clone(analyser)))
}

async fn remaining_capacity(analyser: &AnalyserHandle, repo: &Repository, since: UtcDateTime) -> Result<u64> {
    let capacity = analyser.monthly_capacity();
    if capacity == u64::MAX {
        return Ok(u64::MAX);
    }
    let used = repo
        .count_by_analyser_since(analyser.identifier(), since)
        .await
        .or_raise(|| ErrorKind::Cache)?;
    Ok(capacity.saturating_sub(used))
}
