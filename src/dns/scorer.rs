//! Resolver quality scoring.
//!
//! Two passes exist. The full check probes the target and standard domain
//! groups and blends an instant score with the resolver's trend score. The
//! quick check, used during peak hour, only probes the critical domains and
//! scores them directly. Both record their outcome in the [`HistoryStore`].

#![allow(clippy::missing_panics_doc)]

use crate::config::{DomainSets, LatencyBand, ScoringConfig};
use crate::dns::history::HistoryStore;
use crate::dns::probe::DomainProbe;
use crate::dns::types::{CheckMode, ProbeResult, QualityResult, QualityStatus, FAILED_LATENCY_MS};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Largest penalty consecutive failures can take off a composite score.
const MAX_FAILURE_PENALTY: u32 = 20;

/// Penalty per consecutive failure.
const FAILURE_PENALTY_STEP: u32 = 3;

/// Grades resolvers.
///
/// [`QualityScorer`] is the production implementation; the selector and the
/// switch controller only depend on this trait.
#[async_trait]
pub trait QualityGrader: Send + Sync {
    /// Grade `resolver` with the given pass. Never fails; scorer errors yield
    /// the FAILED sentinel.
    async fn grade(&self, resolver: IpAddr, mode: CheckMode) -> QualityResult;

    /// Trend score from the resolver's history.
    fn trend_score(&self, resolver: IpAddr) -> u32;

    /// Number of critical domains resolving through `resolver` with a latency
    /// inside `band`.
    async fn critical_health(&self, resolver: IpAddr, band: LatencyBand) -> usize;
}

/// Success statistics of one probed domain group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStats {
    /// Probes that succeeded inside the latency band
    pub successes: usize,
    /// Probes that got an answer at all
    pub resolved: usize,
    /// Domains in the group, answered or not
    pub total: usize,
    /// Integer success percentage
    pub success_rate: u32,
    /// Mean latency of successful probes, or 999 without any
    pub avg_latency_ms: u64,
}

impl GroupStats {
    /// Summarize probe results for a group of `total` domains.
    ///
    /// Probes that never reported (abandoned at the deadline) count as failures.
    #[must_use]
    pub fn from_results(results: &[ProbeResult], total: usize) -> Self {
        let latencies: Vec<u64> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.latency_ms)
            .collect();
        let successes = latencies.len();
        let resolved = results.iter().filter(|r| r.resolved).count();
        let success_rate = if total > 0 {
            (successes * 100 / total) as u32
        } else {
            0
        };
        let avg_latency_ms = if latencies.is_empty() {
            FAILED_LATENCY_MS
        } else {
            latencies.iter().sum::<u64>() / latencies.len() as u64
        };

        Self {
            successes,
            resolved,
            total,
            success_rate,
            avg_latency_ms,
        }
    }
}

/// Instant score of a full check from the target group statistics.
#[must_use]
pub const fn instant_score(success_rate: u32, avg_latency_ms: u64) -> u32 {
    if success_rate >= 80 && avg_latency_ms < 200 {
        85
    } else if success_rate >= 70 && avg_latency_ms < 300 {
        75
    } else if success_rate >= 50 && avg_latency_ms < 500 {
        60
    } else if success_rate >= 30 {
        40
    } else {
        10
    }
}

/// Score of a quick check.
#[must_use]
pub const fn quick_score(success_rate: u32, avg_latency_ms: u64) -> u32 {
    if success_rate == 100 && avg_latency_ms < 200 {
        90
    } else if success_rate == 100 && avg_latency_ms < 400 {
        75
    } else if success_rate >= 50 && avg_latency_ms < 600 {
        60
    } else if success_rate >= 50 {
        40
    } else {
        20
    }
}

/// Blend instant and trend scores and apply the failure penalty.
///
/// The result is always within `0..=100`.
#[must_use]
pub fn composite_score(instant: u32, trend: u32, consecutive_failures: u32) -> u32 {
    // 0.7 / 0.3 weights in tenths, rounded half up without float error
    let blended = (i64::from(instant) * 7 + i64::from(trend) * 3 + 5) / 10;
    let penalty = consecutive_failures
        .saturating_mul(FAILURE_PENALTY_STEP)
        .min(MAX_FAILURE_PENALTY);
    (blended - i64::from(penalty)).clamp(0, 100) as u32
}

/// Usable rule of the full check.
#[must_use]
pub const fn full_usable(score: u32, standard_success_rate: u32) -> bool {
    score >= 40 || standard_success_rate >= 70
}

/// Usable rule of the quick check.
#[must_use]
pub const fn quick_usable(score: u32) -> bool {
    score >= 40
}

/// Resolver quality scorer.
///
/// # Example
///
/// ```ignore
/// let history = Arc::new(HistoryStore::default());
/// let probe = Arc::new(ResolverProbe::new(53, Duration::from_secs(3)));
/// let scorer = QualityScorer::new(probe, history, DomainSets::default(), ScoringConfig::default());
/// let result = scorer.full_check("1.1.1.1".parse()?).await;
/// println!("{} {}", result.score, result.status);
/// ```
pub struct QualityScorer {
    probe: Arc<dyn DomainProbe>,
    history: Arc<HistoryStore>,
    domains: DomainSets,
    settings: ScoringConfig,
}

impl QualityScorer {
    /// Create a scorer sharing `history` with anyone else holding it.
    #[must_use]
    pub fn new(
        probe: Arc<dyn DomainProbe>,
        history: Arc<HistoryStore>,
        domains: DomainSets,
        settings: ScoringConfig,
    ) -> Self {
        Self {
            probe,
            history,
            domains,
            settings,
        }
    }

    /// The history store this scorer records into.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Run the pass matching the peak-hour flag.
    pub async fn check(&self, resolver: IpAddr, peak_hour: bool) -> QualityResult {
        self.guarded(resolver, CheckMode::for_peak(peak_hour)).await
    }

    /// Full check: target and standard groups, bounded by the full-check timeout.
    pub async fn full_check(&self, resolver: IpAddr) -> QualityResult {
        self.guarded(resolver, CheckMode::Full).await
    }

    /// Quick check: critical domains only, bounded by the quick-check timeout.
    pub async fn quick_check(&self, resolver: IpAddr) -> QualityResult {
        self.guarded(resolver, CheckMode::Quick).await
    }

    /// Run a pass, turning a panic anywhere inside it into the FAILED sentinel.
    async fn guarded(&self, resolver: IpAddr, mode: CheckMode) -> QualityResult {
        let pass = async {
            match mode {
                CheckMode::Full => self.run_full(resolver).await,
                CheckMode::Quick => self.run_quick(resolver).await,
            }
        };

        match AssertUnwindSafe(pass).catch_unwind().await {
            Ok(result) => {
                tracing::debug!(
                    "DNS {resolver} -> {} ({}) [{}ms]",
                    result.score,
                    result.status,
                    result.avg_latency_ms
                );
                result
            }
            Err(_) => {
                tracing::error!("Quality check of {resolver} crashed");
                self.history.record(resolver, FAILED_LATENCY_MS, false);
                QualityResult::failed(resolver, mode)
            }
        }
    }

    async fn run_full(&self, resolver: IpAddr) -> QualityResult {
        let deadline = Instant::now() + self.settings.full_timeout();
        let band = self.settings.full_band;

        let (target, standard) = tokio::join!(
            self.run_probes(resolver, &self.domains.extended, band, deadline),
            self.run_probes(resolver, &self.domains.standard, band, deadline),
        );
        let target = GroupStats::from_results(&target, self.domains.extended.len());
        let standard = GroupStats::from_results(&standard, self.domains.standard.len());

        if target.resolved + standard.resolved == 0 {
            tracing::warn!("DNS {resolver}: no domain resolvable");
            self.history.record(resolver, FAILED_LATENCY_MS, false);
            return QualityResult::failed(resolver, CheckMode::Full);
        }

        // Trend and penalty reflect history before this observation
        let trend = self.history.trend_score(resolver);
        let failures = self.history.consecutive_failures(resolver);
        let instant = instant_score(target.success_rate, target.avg_latency_ms);
        let score = composite_score(instant, trend, failures);
        let usable = full_usable(score, standard.success_rate);

        self.history.record(resolver, target.avg_latency_ms, usable);

        QualityResult {
            resolver,
            mode: CheckMode::Full,
            score,
            avg_latency_ms: target.avg_latency_ms,
            target_success_rate: target.success_rate,
            standard_success_rate: standard.success_rate,
            usable,
            status: QualityStatus::from_full_score(score),
        }
    }

    async fn run_quick(&self, resolver: IpAddr) -> QualityResult {
        let deadline = Instant::now() + self.settings.quick_timeout();
        let results = self
            .run_probes(resolver, &self.domains.critical, self.settings.quick_band, deadline)
            .await;
        let critical = GroupStats::from_results(&results, self.domains.critical.len());

        if critical.resolved == 0 {
            tracing::warn!("DNS {resolver}: no critical domain resolvable");
            self.history.record(resolver, FAILED_LATENCY_MS, false);
            return QualityResult::failed(resolver, CheckMode::Quick);
        }

        let score = quick_score(critical.success_rate, critical.avg_latency_ms);
        let usable = quick_usable(score);

        self.history.record(resolver, critical.avg_latency_ms, usable);

        QualityResult {
            resolver,
            mode: CheckMode::Quick,
            score,
            avg_latency_ms: critical.avg_latency_ms,
            target_success_rate: critical.success_rate,
            standard_success_rate: critical.success_rate,
            usable,
            status: QualityStatus::from_quick_score(score),
        }
    }

    /// Probe every domain concurrently and collect what finishes before `deadline`.
    ///
    /// Unfinished probes are dropped, which cancels them.
    async fn run_probes(
        &self,
        resolver: IpAddr,
        domains: &[String],
        band: LatencyBand,
        deadline: Instant,
    ) -> Vec<ProbeResult> {
        let mut pending: FuturesUnordered<_> = domains
            .iter()
            .map(|domain| self.probe_domain(resolver, domain, band))
            .collect();
        let mut results = Vec::with_capacity(domains.len());

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(
                        "DNS {resolver}: {} probe(s) abandoned at deadline",
                        pending.len()
                    );
                    break;
                }
            }
        }

        results
    }

    /// Resolve one domain; any error or out-of-band latency is an unsuccessful probe.
    async fn probe_domain(&self, resolver: IpAddr, domain: &str, band: LatencyBand) -> ProbeResult {
        let start = Instant::now();
        let outcome =
            tokio::time::timeout(self.settings.probe_timeout(), self.probe.lookup(resolver, domain))
                .await;
        let latency_ms = elapsed_ms(start.elapsed());

        match outcome {
            Ok(Ok(count)) if count > 0 && band.contains(latency_ms) => {
                ProbeResult::success(domain, latency_ms)
            }
            Ok(Ok(count)) if count > 0 => {
                tracing::trace!("{domain} via {resolver}: {latency_ms}ms outside band");
                ProbeResult::out_of_band(domain, latency_ms)
            }
            Ok(Ok(_)) => {
                tracing::trace!("{domain} via {resolver}: empty answer");
                ProbeResult::failure(domain, latency_ms)
            }
            Ok(Err(e)) => {
                tracing::trace!("{domain} via {resolver} failed: {e}");
                ProbeResult::failure(domain, latency_ms)
            }
            Err(_) => ProbeResult::failure(domain, latency_ms),
        }
    }
}

#[async_trait]
impl QualityGrader for QualityScorer {
    async fn grade(&self, resolver: IpAddr, mode: CheckMode) -> QualityResult {
        self.guarded(resolver, mode).await
    }

    fn trend_score(&self, resolver: IpAddr) -> u32 {
        self.history.trend_score(resolver)
    }

    async fn critical_health(&self, resolver: IpAddr, band: LatencyBand) -> usize {
        let results = futures::future::join_all(
            self.domains
                .critical
                .iter()
                .map(|domain| self.probe_domain(resolver, domain, band)),
        )
        .await;

        for r in &results {
            if r.success {
                tracing::debug!("{} OK ({}ms)", r.domain, r.latency_ms);
            } else {
                tracing::warn!("{} slow/failed ({}ms)", r.domain, r.latency_ms);
            }
        }
        results.iter().filter(|r| r.success).count()
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
