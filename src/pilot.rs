//! Control interface.
//!
//! [`DnsPilot`] wires the scorer, relay and controller together and exposes
//! the operations a host shell needs. Only [`DnsPilot::start`] can fail; every
//! other operation logs problems and carries on.

use crate::config::PilotConfig;
use crate::control::{MonitorHandle, SwitchController};
use crate::dns::{HistoryStore, QualityGrader, QualityScorer, ResolverProbe};
use crate::error::Result;
use crate::events::{EventBus, StatusEvent};
use crate::relay::{NoReclaim, PortReclaimer, RelayEngine, RestartOutcome, StatsSnapshot};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Group name that asks the selector to choose.
pub const AUTO_GROUP: &str = "auto";

/// Self-healing DNS relay.
///
/// # Example
///
/// ```ignore
/// let pilot = DnsPilot::new(PilotConfig::default());
/// let addr = pilot.start("auto").await?;
/// println!("serving on {addr} via {:?}", pilot.current_resolver());
/// pilot.stop().await;
/// ```
pub struct DnsPilot {
    config: PilotConfig,
    events: EventBus,
    relay: Arc<RelayEngine>,
    controller: Arc<SwitchController>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl DnsPilot {
    /// Build a pilot probing real resolvers.
    #[must_use]
    pub fn new(config: PilotConfig) -> Self {
        let probe = Arc::new(ResolverProbe::new(
            config.relay.upstream_port,
            config.scoring.probe_timeout(),
        ));
        let history = Arc::new(HistoryStore::new(config.scoring.history_capacity));
        let scorer = QualityScorer::new(
            probe,
            history,
            config.domains.clone(),
            config.scoring.clone(),
        );
        Self::with_parts(config, Arc::new(scorer), Arc::new(NoReclaim))
    }

    /// Build a pilot around a custom grader and port reclaimer.
    #[must_use]
    pub fn with_parts(
        config: PilotConfig,
        grader: Arc<dyn QualityGrader>,
        reclaimer: Arc<dyn PortReclaimer>,
    ) -> Self {
        let events = EventBus::new();
        let relay = RelayEngine::with_reclaimer(
            config.relay.clone(),
            config.groups.clone(),
            events.clone(),
            reclaimer,
        );
        let controller = Arc::new(SwitchController::new(
            &config,
            grader,
            Arc::clone(&relay),
            events.clone(),
        ));

        Self {
            config,
            events,
            relay,
            controller,
            monitor: Mutex::new(None),
        }
    }

    /// Start relaying through `group` (`"A"`, `"B"`, or `"auto"`) and start
    /// the health monitor.
    ///
    /// # Errors
    ///
    /// Fails when the relay cannot bind any port or is already running.
    pub async fn start(&self, group: &str) -> Result<SocketAddr> {
        let group = if group.eq_ignore_ascii_case(AUTO_GROUP) {
            self.resolve_auto_group().await
        } else {
            group.to_uppercase()
        };

        let addr = self.relay.start(&group).await?;

        let mut monitor = self.monitor.lock().await;
        if let Some(previous) = monitor.take() {
            previous.stop(self.config.relay.join_timeout()).await;
        }
        *monitor = Some(Arc::clone(&self.controller).spawn());
        Ok(addr)
    }

    async fn resolve_auto_group(&self) -> String {
        let peak_hour = self.controller.schedule().is_peak_hour();
        let selection = self.controller.select(peak_hour).await;
        let winner = self.config.groups.candidate(selection.resolver);
        tracing::info!("Auto-selected {winner} (peak: {peak_hour})");
        winner.group
    }

    /// Stop the monitor and the relay.
    pub async fn stop(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = &monitor {
            monitor.signal();
        }
        // Stopping the relay first makes an in-flight switch abort cleanly
        self.relay.stop().await;
        if let Some(monitor) = monitor {
            monitor.stop(self.config.relay.join_timeout()).await;
        }
    }

    /// Rebind the relay with its current group. Returns whether it restarted.
    pub async fn soft_restart(&self) -> bool {
        let restarted = match self.relay.soft_restart(None).await {
            Ok(RestartOutcome::Restarted(addr)) => {
                tracing::info!("Relay restarted on {addr}");
                true
            }
            Ok(outcome) => {
                tracing::warn!("Soft restart skipped: {outcome:?}");
                false
            }
            Err(e) => {
                tracing::error!("Soft restart failed: {e}");
                false
            }
        };
        self.events.emit(StatusEvent::Status {
            text: self.status_text(),
        });
        restarted
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.relay.is_running()
    }

    /// Primary resolver of the active group.
    #[must_use]
    pub fn current_resolver(&self) -> Option<IpAddr> {
        self.relay.current_resolver()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.relay.local_addr()
    }

    #[must_use]
    pub fn status_text(&self) -> String {
        self.controller
            .status_text(self.controller.schedule().is_peak_hour())
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.relay.stats()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<SwitchController> {
        &self.controller
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<RelayEngine> {
        &self.relay
    }
}
