//! Candidate selection.
//!
//! Grades every candidate concurrently and picks the best usable one.

use crate::dns::scorer::QualityGrader;
use crate::dns::types::{CheckMode, QualityResult};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of a selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen resolver, or the default resolver when nothing was usable
    pub resolver: IpAddr,
    /// Result of the chosen resolver; `None` when the default was returned
    pub best: Option<QualityResult>,
    /// Every result that arrived before the deadline, in arrival order
    pub results: Vec<QualityResult>,
    /// Whether the pass hit its timeout
    pub timed_out: bool,
}

impl Selection {
    /// Whether the default resolver was returned.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.best.is_none()
    }
}

/// Ranking weight of a usable result.
///
/// `score * 0.6 + max(1000 - latency, 0) * 0.3 + trend * 0.1`
#[must_use]
pub fn rank(result: &QualityResult, trend_score: u32) -> f64 {
    let latency_headroom = 1000_u64.saturating_sub(result.avg_latency_ms) as f64;
    f64::from(result.score) * 0.6 + latency_headroom * 0.3 + f64::from(trend_score) * 0.1
}

/// Pick the best usable result. Ties keep the earliest result.
#[must_use]
pub fn pick_best<'a>(
    results: &'a [QualityResult],
    trend: impl Fn(IpAddr) -> u32,
) -> Option<&'a QualityResult> {
    let mut best: Option<(&QualityResult, f64)> = None;
    for result in results.iter().filter(|r| r.usable) {
        let weight = rank(result, trend(result.resolver));
        if best.map_or(true, |(_, w)| weight > w) {
            best = Some((result, weight));
        }
    }
    best.map(|(r, _)| r)
}

/// Runs the grader across candidates with a bounded worker pool.
pub struct CandidateSelector {
    grader: Arc<dyn QualityGrader>,
    default_resolver: IpAddr,
    max_parallel: usize,
}

impl CandidateSelector {
    #[must_use]
    pub fn new(grader: Arc<dyn QualityGrader>, default_resolver: IpAddr, max_parallel: usize) -> Self {
        Self {
            grader,
            default_resolver,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Grade all `candidates` and pick the best usable one.
    ///
    /// The whole pass is bounded by `timeout`. Checks still running at the
    /// deadline are aborted and anything they would have produced is dropped.
    pub async fn select(&self, candidates: &[IpAddr], peak_hour: bool, timeout: Duration) -> Selection {
        let mode = CheckMode::for_peak(peak_hour);
        tracing::debug!(
            "Selecting best DNS among {} candidates (peak: {peak_hour})",
            candidates.len()
        );

        let results = Arc::new(Mutex::new(Vec::with_capacity(candidates.len())));
        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for &candidate in candidates {
            let grader = Arc::clone(&self.grader);
            let results = Arc::clone(&results);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let result = grader.grade(candidate, mode).await;
                if let Ok(mut results) = results.lock() {
                    results.push(result);
                }
            });
        }

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("DNS check task failed: {e}");
                }
            }
        })
        .await;

        let timed_out = drained.is_err();
        if timed_out {
            tracing::warn!("DNS selection timeout after {timeout:?}");
            tasks.abort_all();
        }

        let results = results
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();

        let best = pick_best(&results, |ip| self.grader.trend_score(ip)).cloned();
        let resolver = best.as_ref().map_or(self.default_resolver, |b| b.resolver);

        match &best {
            Some(b) => tracing::info!(
                "Best DNS: {} score {} ({}) [{}ms]",
                b.resolver,
                b.score,
                b.status,
                b.avg_latency_ms
            ),
            None => tracing::warn!(
                "No usable DNS candidate, falling back to {}",
                self.default_resolver
            ),
        }

        Selection {
            resolver,
            best,
            results,
            timed_out,
        }
    }
}
