//! Switch controller.
//!
//! Periodically checks the active resolver and, when it degrades, moves the
//! relay to the group of a clearly better candidate. Switching is throttled
//! by a [`SwitchLimiter`]; repeated evaluation failures open a
//! [`CircuitBreaker`] that suppresses evaluations for a while.

use crate::config::{CandidateConfig, ControlConfig, PilotConfig, ScoringConfig};
use crate::control::limiter::{CircuitBreaker, SwitchLimiter};
use crate::control::peak::PeakSchedule;
use crate::dns::{CandidateSelector, CheckMode, QualityGrader, ResolverCandidate, Selection};
use crate::error::{Error, Result};
use crate::events::{EventBus, StatusEvent, SMART_SWITCH};
use crate::relay::{RelayEngine, RestartOutcome};
use chrono::Utc;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What a health tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Relay is not running
    Idle,
    /// Auto-switching is cooling down
    SwitchingDisabled,
    /// Circuit breaker is open
    BreakerOpen,
    /// Every critical domain resolved
    Healthy,
    /// Some critical domains failed; logged only
    Degraded { resolved: usize, total: usize },
    /// Nothing resolved, an evaluation ran
    Evaluated(Evaluation),
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// No candidate beat the active resolver by the threshold
    Kept { current: u32, best: u32 },
    /// Winner already belongs to the active group
    SameGroup { resolver: IpAddr, group: String },
    /// Switch limit reached
    RateLimited,
    /// The relay refused the soft restart
    RestartRefused(RestartOutcome),
    /// Relay now serves the winner's group
    Switched { resolver: IpAddr, group: String },
    /// Evaluation timed out or errored
    Failed,
}

/// Decision reached by the timed part of an evaluation.
enum Decision {
    Keep { current: u32, best: u32 },
    Switch(ResolverCandidate),
    SameGroup(ResolverCandidate),
}

struct Guard {
    limiter: SwitchLimiter,
    breaker: CircuitBreaker,
}

/// Health monitor and failover policy.
pub struct SwitchController {
    grader: Arc<dyn QualityGrader>,
    selector: CandidateSelector,
    relay: Arc<RelayEngine>,
    candidates: CandidateConfig,
    scoring: ScoringConfig,
    control: ControlConfig,
    critical_domains: usize,
    schedule: PeakSchedule,
    guard: Mutex<Guard>,
    switches: AtomicU64,
    events: EventBus,
}

impl SwitchController {
    #[must_use]
    pub fn new(
        config: &PilotConfig,
        grader: Arc<dyn QualityGrader>,
        relay: Arc<RelayEngine>,
        events: EventBus,
    ) -> Self {
        let control = config.control.clone();
        let guard = Guard {
            limiter: SwitchLimiter::new(
                control.max_switches,
                control.switch_window(),
                control.auto_switch_cooldown(),
            ),
            breaker: CircuitBreaker::new(control.breaker_threshold, control.breaker_reset()),
        };

        Self {
            selector: CandidateSelector::new(
                Arc::clone(&grader),
                config.candidates.default_resolver,
                config.scoring.max_parallel_checks,
            ),
            grader,
            relay,
            candidates: config.candidates.clone(),
            scoring: config.scoring.clone(),
            control,
            critical_domains: config.domains.critical.len(),
            schedule: PeakSchedule::new(&config.peak),
            guard: Mutex::new(guard),
            switches: AtomicU64::new(0),
            events,
        }
    }

    #[must_use]
    pub fn schedule(&self) -> &PeakSchedule {
        &self.schedule
    }

    /// Switches made since the monitor started.
    #[must_use]
    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Consecutive evaluation failures.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.guard().breaker.failures()
    }

    /// Pick the best candidate for the given mode.
    pub async fn select(&self, peak_hour: bool) -> Selection {
        self.selector
            .select(
                self.candidates.for_mode(peak_hour),
                peak_hour,
                self.scoring.selection_timeout(peak_hour),
            )
            .await
    }

    /// Run one health tick now.
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Instant::now(), self.schedule.is_peak_hour()).await
    }

    /// Run one health tick as if at `now`.
    pub async fn tick_at(&self, now: Instant, peak_hour: bool) -> TickOutcome {
        let outcome = self.check_health(now, peak_hour).await;
        self.emit_status(peak_hour);
        outcome
    }

    async fn check_health(&self, now: Instant, peak_hour: bool) -> TickOutcome {
        let Some(primary) = self.relay.current_resolver().filter(|_| self.relay.is_running()) else {
            return TickOutcome::Idle;
        };

        {
            let mut guard = self.guard();
            if !guard.limiter.is_enabled(now) {
                tracing::debug!("Auto-switch disabled, skipping health check");
                return TickOutcome::SwitchingDisabled;
            }
            if !guard.breaker.allow(now) {
                tracing::debug!("Circuit breaker open, skipping health check");
                return TickOutcome::BreakerOpen;
            }
        }

        let total = self.critical_domains;
        let resolved = self
            .grader
            .critical_health(primary, self.control.health_band)
            .await;

        if resolved >= total {
            tracing::debug!("Health check OK for {primary} ({resolved}/{total})");
            TickOutcome::Healthy
        } else if resolved > 0 {
            tracing::warn!("Partial DNS failure on {primary} ({resolved}/{total})");
            TickOutcome::Degraded { resolved, total }
        } else {
            tracing::warn!("Critical DNS failure on {primary}, evaluating alternatives");
            TickOutcome::Evaluated(self.evaluate_at(now, peak_hour).await)
        }
    }

    /// Grade the active resolver against the best candidate and switch
    /// groups if the gap reaches the threshold for the mode.
    ///
    /// Grading and selection are bounded by the evaluation timeout; the
    /// switch itself runs after that bound so a restart is never cut short.
    pub async fn evaluate_at(&self, now: Instant, peak_hour: bool) -> Evaluation {
        let decision = match self.assess_within(peak_hour).await {
            Ok(decision) => {
                self.guard().breaker.record_success();
                decision
            }
            Err(Error::Timeout) => {
                tracing::warn!(
                    "Evaluation timed out after {:?}",
                    self.control.evaluation_timeout()
                );
                self.guard().breaker.record_failure(now);
                return Evaluation::Failed;
            }
            Err(e) => {
                tracing::error!("Evaluation failed: {e}");
                self.guard().breaker.record_failure(now);
                return Evaluation::Failed;
            }
        };

        match decision {
            Decision::Keep { current, best } => Evaluation::Kept { current, best },
            Decision::SameGroup(best) => {
                tracing::info!("Best resolver {best} already active");
                Evaluation::SameGroup {
                    resolver: best.ip,
                    group: best.group,
                }
            }
            Decision::Switch(best) => self.switch_to(now, peak_hour, best).await,
        }
    }

    async fn assess_within(&self, peak_hour: bool) -> Result<Decision> {
        tokio::time::timeout(self.control.evaluation_timeout(), self.assess(peak_hour)).await?
    }

    async fn assess(&self, peak_hour: bool) -> Result<Decision> {
        let current = self
            .relay
            .current_resolver()
            .ok_or_else(|| Error::relay("no active resolver"))?;
        let current_score = self
            .grader
            .grade(current, CheckMode::for_peak(peak_hour))
            .await
            .score;

        let selection = self.select(peak_hour).await;
        let best = match selection.best {
            Some(best) => best,
            None => {
                tracing::warn!(
                    "No usable candidate, grading default resolver {}",
                    selection.resolver
                );
                self.grader
                    .grade(selection.resolver, CheckMode::for_peak(peak_hour))
                    .await
            }
        };

        let threshold = self.control.threshold(peak_hour);
        let gap = best.score as i32 - current_score as i32;
        tracing::info!(
            "Current {current} score {current_score}, best {} score {} (gap {gap}, threshold {threshold})",
            best.resolver,
            best.score
        );
        if gap < threshold {
            return Ok(Decision::Keep {
                current: current_score,
                best: best.score,
            });
        }

        let winner = self.relay.groups().candidate(best.resolver);
        if self.relay.current_group().as_deref() == Some(winner.group.as_str()) {
            return Ok(Decision::SameGroup(winner));
        }
        Ok(Decision::Switch(winner))
    }

    async fn switch_to(&self, now: Instant, peak_hour: bool, winner: ResolverCandidate) -> Evaluation {
        let ResolverCandidate { ip: resolver, group } = winner;
        if !self.guard().limiter.try_acquire(now) {
            return Evaluation::RateLimited;
        }

        tracing::info!("Switching to group {group} (best resolver {resolver})");
        match self.relay.soft_restart(Some(&group)).await {
            Ok(RestartOutcome::Restarted(_)) => {
                self.guard().limiter.record(now);
                self.switches.fetch_add(1, Ordering::Relaxed);
                self.events.emit(StatusEvent::Switched {
                    resolver,
                    group: group.clone(),
                    timestamp: Utc::now(),
                    reason: SMART_SWITCH.to_string(),
                    peak_hour,
                });
                Evaluation::Switched { resolver, group }
            }
            Ok(outcome) => {
                tracing::warn!("Switch to group {group} not applied: {outcome:?}");
                Evaluation::RestartRefused(outcome)
            }
            Err(e) => {
                tracing::error!("Switch to group {group} failed: {e}");
                self.guard().breaker.record_failure(now);
                Evaluation::Failed
            }
        }
    }

    /// One-line summary of the controller and relay.
    #[must_use]
    pub fn status_text(&self, peak_hour: bool) -> String {
        let primary = self
            .relay
            .current_resolver()
            .map_or_else(|| "none".to_string(), |ip| ip.to_string());
        let mut text = format!("DNS: {primary} | Switches: {}", self.switch_count());
        let failures = self.failure_count();
        if failures > 0 {
            text.push_str(&format!(" | Fails: {failures}"));
        }
        text.push_str(if peak_hour { " | PEAK" } else { " | NORMAL" });
        text
    }

    fn emit_status(&self, peak_hour: bool) {
        self.events.emit(StatusEvent::Status {
            text: self.status_text(peak_hour),
        });
    }

    /// Purge expired switch records.
    pub fn cleanup(&self, now: Instant) {
        let mut guard = self.guard();
        guard.limiter.purge(now);
        tracing::debug!("Switch window holds {} records", guard.limiter.count());
    }

    /// Forget switch history, counters and breaker state.
    pub fn reset(&self) {
        let mut guard = self.guard();
        guard.limiter.reset();
        guard.breaker.reset();
        self.switches.store(0, Ordering::Relaxed);
    }

    /// Start the health and cleanup loops.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let health_every = self.control.health_interval();
        let cleanup_every = self.control.cleanup_interval();

        let controller = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut health = tokio::time::interval_at(start + health_every, health_every);
            health.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cleanup = tokio::time::interval_at(start + cleanup_every, cleanup_every);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!("Health monitor started (every {health_every:?})");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = health.tick() => {
                        let outcome = self.tick().await;
                        tracing::debug!("Health tick: {outcome:?}");
                    }
                    _ = cleanup.tick() => self.cleanup(Instant::now()),
                }
            }

            self.reset();
            tracing::info!("Health monitor stopped");
        });

        MonitorHandle {
            handle,
            shutdown: shutdown_tx,
            controller,
        }
    }

    fn guard(&self) -> MutexGuard<'_, Guard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation handle of a running monitor.
pub struct MonitorHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    controller: Arc<SwitchController>,
}

impl MonitorHandle {
    /// Ask the monitor to stop after the current tick.
    pub fn signal(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the monitor, aborting it if it does not exit within `timeout`.
    ///
    /// Controller state is reset either way.
    pub async fn stop(self, timeout: Duration) {
        self.signal();
        let mut handle = self.handle;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            tracing::warn!("Health monitor did not exit within {timeout:?}, aborting");
            handle.abort();
        }
        self.controller.reset();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LatencyBand, RelayConfig};
    use crate::dns::{QualityResult, QualityStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Grader with fixed scores, a fixed health answer and an optional delay.
    struct ScriptedGrader {
        scores: HashMap<IpAddr, u32>,
        default_score: u32,
        healthy_domains: usize,
        delay: Duration,
        grades: AtomicUsize,
    }

    impl ScriptedGrader {
        fn new(scores: &[(&str, u32)], default_score: u32, healthy_domains: usize) -> Self {
            Self {
                scores: scores
                    .iter()
                    .map(|(ip, s)| (ip.parse().unwrap(), *s))
                    .collect(),
                default_score,
                healthy_domains,
                delay: Duration::ZERO,
                grades: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QualityGrader for ScriptedGrader {
        async fn grade(&self, resolver: IpAddr, mode: CheckMode) -> QualityResult {
            self.grades.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let score = self.scores.get(&resolver).copied().unwrap_or(self.default_score);
            QualityResult {
                resolver,
                mode,
                score,
                avg_latency_ms: 50,
                target_success_rate: 100,
                standard_success_rate: 100,
                usable: score >= 40,
                status: QualityStatus::from_full_score(score),
            }
        }

        fn trend_score(&self, _resolver: IpAddr) -> u32 {
            50
        }

        async fn critical_health(&self, _resolver: IpAddr, _band: LatencyBand) -> usize {
            self.healthy_domains
        }
    }

    fn test_config() -> PilotConfig {
        let mut config = PilotConfig::default();
        config.relay = RelayConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            ports: vec![0],
            fallback: vec![],
            restart_settle_ms: 10,
            join_timeout_ms: 200,
            ..RelayConfig::default()
        };
        config
    }

    async fn controller_with(grader: ScriptedGrader, group: &str) -> (Arc<SwitchController>, EventBus) {
        let config = test_config();
        let events = EventBus::new();
        let relay = RelayEngine::new(config.relay.clone(), config.groups.clone(), events.clone());
        relay.start(group).await.unwrap();
        let controller = SwitchController::new(&config, Arc::new(grader), relay, events.clone());
        (Arc::new(controller), events)
    }

    #[tokio::test]
    async fn test_healthy_tick_does_nothing() {
        let grader = ScriptedGrader::new(&[], 50, 2);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.tick_at(Instant::now(), false).await;
        assert_eq!(outcome, TickOutcome::Healthy);
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_partial_failure_only_warns() {
        let grader = ScriptedGrader::new(&[("1.1.1.1", 90)], 10, 1);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.tick_at(Instant::now(), false).await;
        assert_eq!(outcome, TickOutcome::Degraded { resolved: 1, total: 2 });
        assert_eq!(controller.relay.current_group().as_deref(), Some("B"));
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_total_failure_switches_group() {
        let grader = ScriptedGrader::new(&[("1.1.1.1", 85)], 50, 0);
        let (controller, events) = controller_with(grader, "B").await;
        let mut rx = events.subscribe();

        let outcome = controller.tick_at(Instant::now(), false).await;
        assert_eq!(
            outcome,
            TickOutcome::Evaluated(Evaluation::Switched {
                resolver: "1.1.1.1".parse().unwrap(),
                group: "A".to_string(),
            })
        );
        assert_eq!(controller.relay.current_group().as_deref(), Some("A"));
        assert_eq!(controller.switch_count(), 1);

        let mut switched = 0;
        while let Ok(event) = rx.try_recv() {
            if let StatusEvent::Switched { reason, .. } = event {
                assert_eq!(reason, SMART_SWITCH);
                switched += 1;
            }
        }
        assert_eq!(switched, 1);
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_gap_below_threshold_keeps_group() {
        let grader = ScriptedGrader::new(&[("1.1.1.1", 65)], 50, 0);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.evaluate_at(Instant::now(), false).await;
        assert_eq!(
            outcome,
            Evaluation::Kept {
                current: 50,
                best: 65
            }
        );
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_no_usable_candidate_compares_default_resolver() {
        // Every candidate is below the usable bar, so the default 1.1.1.1 is graded
        let grader = ScriptedGrader::new(&[("1.1.1.1", 35), ("8.8.4.4", 10)], 30, 0);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.evaluate_at(Instant::now(), false).await;
        assert_eq!(
            outcome,
            Evaluation::Switched {
                resolver: "1.1.1.1".parse().unwrap(),
                group: "A".to_string(),
            }
        );
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_peak_threshold_is_stricter() {
        // 8.8.8.8 is not a peak candidate; gap 25 clears 20 but not 30
        let grader = ScriptedGrader::new(&[("1.1.1.1", 75)], 50, 0);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.evaluate_at(Instant::now(), true).await;
        assert!(matches!(outcome, Evaluation::Kept { .. }));

        let outcome = controller.evaluate_at(Instant::now(), false).await;
        assert!(matches!(outcome, Evaluation::Switched { .. }));
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_winner_in_active_group_is_not_switched() {
        let grader = ScriptedGrader::new(&[("8.8.8.8", 90), ("8.8.4.4", 40)], 30, 0);
        let (controller, _events) = controller_with(grader, "B").await;

        let outcome = controller.evaluate_at(Instant::now(), false).await;
        assert!(matches!(outcome, Evaluation::SameGroup { ref group, .. } if group == "B"));
        assert_eq!(controller.switch_count(), 0);
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_evaluation_timeouts_open_breaker() {
        let mut grader = ScriptedGrader::new(&[("1.1.1.1", 85)], 50, 0);
        grader.delay = Duration::from_secs(60);
        let mut config = test_config();
        config.control.evaluation_timeout_ms = 20;

        let events = EventBus::new();
        let relay = RelayEngine::new(config.relay.clone(), config.groups.clone(), events.clone());
        relay.start("B").await.unwrap();
        let controller = SwitchController::new(&config, Arc::new(grader), relay, events);

        let start = Instant::now();
        for _ in 0..3 {
            let outcome = controller.tick_at(start, false).await;
            assert_eq!(outcome, TickOutcome::Evaluated(Evaluation::Failed));
        }
        assert_eq!(
            controller.tick_at(start + Duration::from_secs(60), false).await,
            TickOutcome::BreakerOpen
        );
        assert!(controller.status_text(false).contains("Fails: 3"));

        // Breaker closes 30 minutes after tripping
        let later = start + Duration::from_secs(30 * 60);
        assert_eq!(
            controller.tick_at(later, false).await,
            TickOutcome::Evaluated(Evaluation::Failed)
        );
        assert_eq!(controller.failure_count(), 1);
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_status_text() {
        let grader = ScriptedGrader::new(&[], 50, 2);
        let (controller, _events) = controller_with(grader, "A").await;

        assert_eq!(
            controller.status_text(true),
            "DNS: 1.1.1.1 | Switches: 0 | PEAK"
        );
        assert_eq!(
            controller.status_text(false),
            "DNS: 1.1.1.1 | Switches: 0 | NORMAL"
        );
        controller.relay.stop().await;
    }

    #[tokio::test]
    async fn test_tick_when_relay_stopped() {
        let grader = ScriptedGrader::new(&[], 50, 0);
        let (controller, _events) = controller_with(grader, "A").await;
        controller.relay.stop().await;

        assert_eq!(
            controller.tick_at(Instant::now(), false).await,
            TickOutcome::Idle
        );
    }

    #[tokio::test]
    async fn test_monitor_stop_resets_state() {
        let grader = ScriptedGrader::new(&[("1.1.1.1", 85)], 50, 0);
        let (controller, _events) = controller_with(grader, "B").await;
        controller.evaluate_at(Instant::now(), false).await;
        assert_eq!(controller.switch_count(), 1);

        let monitor = Arc::clone(&controller).spawn();
        monitor.stop(Duration::from_secs(1)).await;
        assert_eq!(controller.switch_count(), 0);
        controller.relay.stop().await;
    }
}
