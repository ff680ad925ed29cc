//! Switch controller end to end, with a scripted grader and a live relay.

use async_trait::async_trait;
use dnspilot::config::{LatencyBand, PilotConfig, RelayConfig};
use dnspilot::control::{Evaluation, SwitchController, TickOutcome};
use dnspilot::dns::{CheckMode, QualityGrader, QualityResult, QualityStatus};
use dnspilot::events::{EventBus, StatusEvent, SMART_SWITCH};
use dnspilot::relay::RelayEngine;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Scores group A's resolvers at 85 and everything else at 50.
struct GroupScores {
    config: PilotConfig,
    critical_ok: usize,
}

#[async_trait]
impl QualityGrader for GroupScores {
    async fn grade(&self, resolver: IpAddr, mode: CheckMode) -> QualityResult {
        let score = if self.config.groups.group_for(resolver) == "A" {
            85
        } else {
            50
        };
        QualityResult {
            resolver,
            mode,
            score,
            avg_latency_ms: 60,
            target_success_rate: 100,
            standard_success_rate: 100,
            usable: true,
            status: QualityStatus::from_full_score(score),
        }
    }

    fn trend_score(&self, _resolver: IpAddr) -> u32 {
        50
    }

    async fn critical_health(&self, _resolver: IpAddr, _band: LatencyBand) -> usize {
        self.critical_ok
    }
}

fn config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.relay = RelayConfig {
        bind_addr: "127.0.0.1".parse().unwrap(),
        ports: vec![0],
        fallback: vec![],
        restart_settle_ms: 10,
        join_timeout_ms: 200,
        ..RelayConfig::default()
    };
    // Restart headroom for the switch-limit scenario
    config.relay.max_restarts = 20;
    config
}

async fn setup(critical_ok: usize) -> (Arc<SwitchController>, Arc<RelayEngine>, EventBus) {
    let config = config();
    let events = EventBus::new();
    let relay = RelayEngine::new(config.relay.clone(), config.groups.clone(), events.clone());
    relay.start("B").await.unwrap();

    let grader = GroupScores {
        config: config.clone(),
        critical_ok,
    };
    let controller = SwitchController::new(&config, Arc::new(grader), Arc::clone(&relay), events.clone());
    (Arc::new(controller), relay, events)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_degraded_group_b_switches_to_group_a_once() {
    let (controller, relay, events) = setup(0).await;
    let mut rx = events.subscribe();

    let outcome = controller.tick_at(Instant::now(), false).await;
    assert!(matches!(
        outcome,
        TickOutcome::Evaluated(Evaluation::Switched { ref group, .. }) if group == "A"
    ));
    assert_eq!(relay.current_group().as_deref(), Some("A"));
    assert_eq!(relay.current_resolver(), Some("1.1.1.1".parse().unwrap()));

    let switched: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            StatusEvent::Switched {
                resolver,
                group,
                reason,
                peak_hour,
                ..
            } => Some((resolver, group, reason, peak_hour)),
            _ => None,
        })
        .collect();
    assert_eq!(switched.len(), 1);
    let (resolver, group, reason, peak_hour) = &switched[0];
    assert_eq!(group, "A");
    assert_eq!(reason, SMART_SWITCH);
    assert!(!peak_hour);
    assert_eq!(relay.groups().group_for(*resolver), "A");

    // Already on the best group, a second evaluation does nothing
    let outcome = controller.evaluate_at(Instant::now(), false).await;
    assert!(matches!(outcome, Evaluation::Kept { .. }));
    assert!(drain(&mut rx)
        .iter()
        .all(|e| !matches!(e, StatusEvent::Switched { .. })));

    relay.stop().await;
}

#[tokio::test]
async fn test_healthy_resolver_is_left_alone() {
    let (controller, relay, events) = setup(2).await;
    let mut rx = events.subscribe();

    assert_eq!(
        controller.tick_at(Instant::now(), false).await,
        TickOutcome::Healthy
    );
    assert_eq!(relay.current_group().as_deref(), Some("B"));

    let emitted = drain(&mut rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(
        emitted[0],
        StatusEvent::Status {
            text: "DNS: 8.8.4.4 | Switches: 0 | NORMAL".to_string()
        }
    );
    relay.stop().await;
}

#[tokio::test]
async fn test_switch_limit_disables_auto_switching() {
    let (controller, relay, _events) = setup(0).await;
    let start = Instant::now();
    let minute = Duration::from_secs(60);

    // Bounce between groups: restart the relay on B before every evaluation
    for i in 0..5 {
        relay.soft_restart(Some("B")).await.unwrap();
        let outcome = controller.evaluate_at(start + i * minute, false).await;
        assert!(matches!(outcome, Evaluation::Switched { .. }), "switch {i}: {outcome:?}");
    }

    relay.soft_restart(Some("B")).await.unwrap();
    assert_eq!(
        controller.evaluate_at(start + 6 * minute, false).await,
        Evaluation::RateLimited
    );
    assert_eq!(
        controller.tick_at(start + 7 * minute, false).await,
        TickOutcome::SwitchingDisabled
    );
    assert_eq!(relay.current_group().as_deref(), Some("B"));

    // Cool-down over
    let outcome = controller.tick_at(start + 37 * minute, false).await;
    assert!(matches!(outcome, TickOutcome::Evaluated(Evaluation::Switched { .. })));
    relay.stop().await;
}
