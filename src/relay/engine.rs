//! Relay engine.
//!
//! Owns the listening socket and the receive worker. Lifecycle transitions
//! (start, stop, soft restart, crash recovery) are serialized by one async
//! mutex; readers get a cheap snapshot of [`RelayState`].
//!
//! ```text
//! Stopped -> Starting -> Running -> Restarting -> Running
//!                           |            |
//!                           +-> Stopped <+
//! ```

use crate::config::{GroupConfig, RelayConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, StatusEvent};
use crate::relay::forward::{forward_query, query_id, MAX_DNS_PACKET_SIZE};
use crate::relay::stats::{RelayStats, StatsSnapshot};
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle phase of the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Restarting,
}

/// Observable relay state.
///
/// `phase` is only `Running` while a socket is bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayState {
    pub phase: RelayPhase,
    /// Active resolver group
    pub group: Option<String>,
    /// First resolver of the active group
    pub primary: Option<IpAddr>,
    /// Bound listening address
    pub local_addr: Option<SocketAddr>,
}

/// Result of a soft-restart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Rebound on this address
    Restarted(SocketAddr),
    /// Relay was not running, or was stopped while the restart was in flight
    NotRunning,
    /// Another restart is in progress
    AlreadyRestarting,
    /// Too many restarts inside the restart window
    RateLimited,
}

/// Best-effort hook run before binding each candidate port.
///
/// Reclaiming a port held by another process is host-specific and privileged;
/// failures are logged and ignored.
pub trait PortReclaimer: Send + Sync {
    fn reclaim(&self, port: u16) -> io::Result<()>;
}

/// Reclaimer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReclaim;

impl PortReclaimer for NoReclaim {
    fn reclaim(&self, _port: u16) -> io::Result<()> {
        Ok(())
    }
}

/// Sliding window of soft-restart timestamps.
#[derive(Debug)]
pub struct RestartWindow {
    times: VecDeque<Instant>,
    max: usize,
    window: Duration,
}

impl RestartWindow {
    #[must_use]
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            times: VecDeque::new(),
            max,
            window,
        }
    }

    /// Record a restart at `now` if fewer than `max` happened inside the window.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while self
            .times
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= self.window)
        {
            self.times.pop_front();
        }
        if self.times.len() >= self.max {
            return false;
        }
        self.times.push_back(now);
        true
    }
}

/// A running receive worker.
struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    /// Signal the worker and wait up to `timeout` for it to exit, aborting it otherwise.
    async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            tracing::warn!("DNS relay worker did not exit within {timeout:?}, aborting");
            handle.abort();
            let _ = handle.await;
        }
    }
}

struct Lifecycle {
    worker: Option<Worker>,
    /// Resolvers of the last successful launch, reused by crash recovery
    upstreams: Arc<[SocketAddr]>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            worker: None,
            upstreams: Arc::from(Vec::new()),
        }
    }
}

/// Everything the receive worker needs, cloned per spawn.
struct WorkerContext {
    upstreams: Arc<[SocketAddr]>,
    fallback: Arc<[SocketAddr]>,
    forward_timeout: Duration,
    pool: Arc<Semaphore>,
    stats: Arc<RelayStats>,
}

/// UDP DNS relay with self-restart.
pub struct RelayEngine {
    config: RelayConfig,
    groups: GroupConfig,
    state: RwLock<RelayState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    restarts: Mutex<RestartWindow>,
    /// Bumped on every spawn and stop; stale recoveries compare against it
    generation: AtomicU64,
    stats: Arc<RelayStats>,
    events: EventBus,
    reclaimer: Arc<dyn PortReclaimer>,
    this: Weak<RelayEngine>,
}

impl RelayEngine {
    /// Create a stopped relay.
    #[must_use]
    pub fn new(config: RelayConfig, groups: GroupConfig, events: EventBus) -> Arc<Self> {
        Self::with_reclaimer(config, groups, events, Arc::new(NoReclaim))
    }

    /// Create a stopped relay with a port reclamation hook.
    #[must_use]
    pub fn with_reclaimer(
        config: RelayConfig,
        groups: GroupConfig,
        events: EventBus,
        reclaimer: Arc<dyn PortReclaimer>,
    ) -> Arc<Self> {
        let restarts = RestartWindow::new(config.max_restarts, config.restart_window());
        Arc::new_cyclic(|this| Self {
            config,
            groups,
            state: RwLock::new(RelayState::default()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::new()),
            restarts: Mutex::new(restarts),
            generation: AtomicU64::new(0),
            stats: Arc::new(RelayStats::new()),
            events,
            reclaimer,
            this: this.clone(),
        })
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().phase == RelayPhase::Running
    }

    /// Primary resolver of the active group.
    #[must_use]
    pub fn current_resolver(&self) -> Option<IpAddr> {
        self.state().primary
    }

    #[must_use]
    pub fn current_group(&self) -> Option<String> {
        self.state().group
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().local_addr
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn groups(&self) -> &GroupConfig {
        &self.groups
    }

    /// Bind a port and start forwarding with `group`'s resolvers.
    ///
    /// # Errors
    ///
    /// Fails if the relay is already running, the group has no IPv4 resolver,
    /// or no candidate port could be bound.
    pub async fn start(&self, group: &str) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        let phase = self.state().phase;
        if phase != RelayPhase::Stopped {
            return Err(Error::relay(format!("cannot start while {phase:?}")));
        }

        self.set_phase(RelayPhase::Starting);
        match self.launch_group(&mut lifecycle, group).await {
            Ok(addr) => {
                tracing::info!("DNS relay started on {addr} (group {group})");
                Ok(addr)
            }
            Err(e) => {
                tracing::error!("Failed to start DNS relay: {e}");
                self.set_phase(RelayPhase::Stopped);
                Err(e)
            }
        }
    }

    /// Stop forwarding and release the socket. Safe to call at any time.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state().phase == RelayPhase::Stopped {
            return;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.update_state(|s| {
            s.phase = RelayPhase::Stopped;
            s.local_addr = None;
        });
        if let Some(worker) = lifecycle.worker.take() {
            worker.shutdown(self.config.join_timeout()).await;
        }

        tracing::info!("DNS relay stopped");
        self.events.emit(StatusEvent::Stopped);
    }

    /// Rebind with `group` (or the current group) without a full stop.
    ///
    /// Tears the worker down, waits the settle delay, then redoes port
    /// acquisition. A stop arriving during the settle delay wins.
    ///
    /// # Errors
    ///
    /// Fails if the rebind itself fails; a recovery attempt is then scheduled.
    pub async fn soft_restart(&self, group: Option<&str>) -> Result<RestartOutcome> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            match self.state().phase {
                RelayPhase::Running => {}
                RelayPhase::Restarting => {
                    tracing::debug!("Restart already in progress, skipping");
                    return Ok(RestartOutcome::AlreadyRestarting);
                }
                RelayPhase::Stopped | RelayPhase::Starting => {
                    tracing::warn!("Soft restart requested while relay is not running");
                    return Ok(RestartOutcome::NotRunning);
                }
            }

            let allowed = self
                .restarts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_acquire(Instant::now());
            if !allowed {
                tracing::warn!(
                    "Max soft restarts reached ({} per {:?})",
                    self.config.max_restarts,
                    self.config.restart_window()
                );
                return Ok(RestartOutcome::RateLimited);
            }

            tracing::info!("Performing soft restart");
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.update_state(|s| {
                s.phase = RelayPhase::Restarting;
                s.local_addr = None;
            });
            if let Some(worker) = lifecycle.worker.take() {
                worker.shutdown(self.config.join_timeout()).await;
            }
        }

        tokio::time::sleep(self.config.restart_settle()).await;

        let mut lifecycle = self.lifecycle.lock().await;
        if self.state().phase != RelayPhase::Restarting {
            tracing::info!("Relay stopped during soft restart, aborting");
            return Ok(RestartOutcome::NotRunning);
        }

        let group = group
            .map(str::to_string)
            .or_else(|| self.current_group())
            .unwrap_or_else(|| self.groups.unmapped_group.clone());

        match self.launch_group(&mut lifecycle, &group).await {
            Ok(addr) => {
                tracing::info!("DNS relay soft-restarted on {addr} (group {group})");
                Ok(RestartOutcome::Restarted(addr))
            }
            Err(e) => {
                tracing::error!("Soft restart failed: {e}");
                self.set_phase(RelayPhase::Starting);
                self.schedule_recovery(
                    self.generation.load(Ordering::SeqCst),
                    self.config.recovery_retry_delay(),
                );
                Err(e)
            }
        }
    }

    /// Resolve `group`, bind and spawn. Caller holds the lifecycle lock.
    async fn launch_group(&self, lifecycle: &mut Lifecycle, group: &str) -> Result<SocketAddr> {
        let servers = self.groups.servers_for(group);
        // IPv6 resolvers stay in the configuration but are not forwarded to
        let upstreams: Arc<[SocketAddr]> = servers
            .iter()
            .filter(|ip| ip.is_ipv4())
            .map(|&ip| self.config.upstream_addr(ip))
            .collect();
        if upstreams.is_empty() {
            return Err(Error::relay(format!("group {group} has no IPv4 resolver")));
        }
        tracing::debug!("Using DNS servers: {servers:?} (group {group})");

        let addr = self.launch(lifecycle, Arc::clone(&upstreams)).await?;
        self.update_state(|s| {
            s.group = Some(group.to_string());
            s.primary = servers.first().copied();
        });
        if let Some(primary) = servers.first() {
            self.events.emit(StatusEvent::Active {
                resolver: *primary,
                group: group.to_string(),
                port: addr.port(),
            });
        }
        Ok(addr)
    }

    /// Bind the first free port and spawn a worker forwarding to `upstreams`.
    async fn launch(&self, lifecycle: &mut Lifecycle, upstreams: Arc<[SocketAddr]>) -> Result<SocketAddr> {
        let socket = self.bind_first_available().await?;
        let addr = socket.local_addr()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let fallback: Arc<[SocketAddr]> = self
            .config
            .fallback
            .iter()
            .filter(|ip| ip.is_ipv4())
            .map(|&ip| self.config.upstream_addr(ip))
            .collect();
        let context = WorkerContext {
            upstreams: Arc::clone(&upstreams),
            fallback,
            forward_timeout: self.config.forward_timeout(),
            pool: Arc::new(Semaphore::new(self.config.max_in_flight.max(1))),
            stats: Arc::clone(&self.stats),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = self.this.clone();
        let crash_delay = self.config.crash_restart_delay();
        let handle = tokio::spawn(async move {
            tracing::debug!("DNS relay worker started on {addr}");
            let outcome = AssertUnwindSafe(receive_loop(socket, context, shutdown_rx))
                .catch_unwind()
                .await;
            let crashed = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    tracing::error!("DNS relay crashed: {e}");
                    true
                }
                Err(_) => {
                    tracing::error!("DNS relay worker panicked");
                    true
                }
            };
            tracing::debug!("DNS relay worker on {addr} exiting");
            if crashed {
                if let Some(engine) = engine.upgrade() {
                    engine.mark_crashed(generation);
                    engine.schedule_recovery(generation, crash_delay);
                }
            }
        });

        lifecycle.worker = Some(Worker {
            handle,
            shutdown: shutdown_tx,
        });
        lifecycle.upstreams = upstreams;
        self.update_state(|s| {
            s.phase = RelayPhase::Running;
            s.local_addr = Some(addr);
        });
        Ok(addr)
    }

    /// Try each configured port in order. Only "address in use" moves on.
    async fn bind_first_available(&self) -> Result<UdpSocket> {
        for &port in &self.config.ports {
            if let Err(e) = self.reclaimer.reclaim(port) {
                tracing::debug!("Port {port} reclamation failed: {e}");
            }

            match UdpSocket::bind(SocketAddr::new(self.config.bind_addr, port)).await {
                Ok(socket) => {
                    tracing::debug!("Acquired port {port}");
                    return Ok(socket);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    tracing::warn!("Port {port} occupied, trying next...");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::error!("All ports blocked!");
        Err(Error::Bind(self.config.ports.len()))
    }

    /// The socket of `generation` is gone; stop reporting it as running.
    fn mark_crashed(&self, generation: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) == generation && state.phase == RelayPhase::Running {
            state.phase = RelayPhase::Starting;
            state.local_addr = None;
        }
    }

    /// Restart with the same resolvers after `delay`, unless something
    /// (stop, restart, another recovery) changed the generation meanwhile.
    fn schedule_recovery(&self, generation: u64, delay: Duration) {
        let engine = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.recover(generation).await;
            }
        });
    }

    async fn recover(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Skipping stale relay recovery");
            return;
        }
        if !matches!(self.state().phase, RelayPhase::Running | RelayPhase::Starting) {
            return;
        }

        tracing::info!("Auto-recovering DNS relay...");
        if let Some(worker) = lifecycle.worker.take() {
            worker.shutdown(self.config.join_timeout()).await;
        }
        self.update_state(|s| {
            s.phase = RelayPhase::Starting;
            s.local_addr = None;
        });

        let upstreams = Arc::clone(&lifecycle.upstreams);
        match self.launch(&mut lifecycle, upstreams).await {
            Ok(addr) => tracing::info!("DNS relay recovered on {addr}"),
            Err(e) => {
                tracing::error!("DNS relay recovery failed: {e}, retrying");
                self.schedule_recovery(
                    self.generation.load(Ordering::SeqCst),
                    self.config.recovery_retry_delay(),
                );
            }
        }
    }

    fn set_phase(&self, phase: RelayPhase) {
        self.update_state(|s| s.phase = phase);
    }

    fn update_state(&self, f: impl FnOnce(&mut RelayState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

/// Receive queries until shutdown, handing each to a pooled handler.
///
/// Handlers send their replies back through a channel, so the listening
/// socket is only ever touched here and closes when this returns.
async fn receive_loop(
    socket: UdpSocket,
    context: WorkerContext,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let (reply_tx, mut reply_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(context.pool.available_permits().max(1));
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            Some((reply, client)) = reply_rx.recv() => {
                if let Err(e) = socket.send_to(&reply, client).await {
                    tracing::warn!("DNS reply to {client} failed: {e}");
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, client) = match received {
                    Ok(r) => r,
                    Err(e) if is_transient(&e) => {
                        tracing::warn!("DNS relay receive error: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                context.stats.record_received();

                let permit = match Arc::clone(&context.pool).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(TryAcquireError::NoPermits) => {
                        tracing::warn!("Worker pool full, dropping query from {client}");
                        context.stats.record_dropped();
                        continue;
                    }
                    Err(TryAcquireError::Closed) => return Ok(()),
                };

                let query = buf[..len].to_vec();
                let upstreams = Arc::clone(&context.upstreams);
                let fallback = Arc::clone(&context.fallback);
                let stats = Arc::clone(&context.stats);
                let reply_tx = reply_tx.clone();
                let timeout = context.forward_timeout;

                tokio::spawn(async move {
                    let _permit = permit;
                    let id = query_id(&query);
                    tracing::debug!("DNS query #{id} from {client}");

                    match forward_query(&query, &upstreams, &fallback, timeout).await {
                        Some(outcome) => {
                            if outcome.via_fallback {
                                stats.record_fallback(outcome.elapsed_ms);
                            } else {
                                stats.record_forwarded(outcome.elapsed_ms);
                            }
                            // The worker may be gone after a restart; the reply is lost then
                            let _ = reply_tx.send((outcome.reply, client)).await;
                        }
                        None => {
                            stats.record_failed();
                            tracing::error!("All DNS servers failed for #{id}");
                        }
                    }
                });
            }
        }
    }
}

/// Receive errors that say nothing about the socket itself.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RelayConfig {
        RelayConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            ports: vec![0],
            fallback: vec![],
            restart_settle_ms: 10,
            join_timeout_ms: 200,
            crash_restart_delay_ms: 10,
            recovery_retry_delay_ms: 10,
            ..RelayConfig::default()
        }
    }

    fn engine() -> Arc<RelayEngine> {
        RelayEngine::new(local_config(), GroupConfig::default(), EventBus::new())
    }

    #[test]
    fn test_restart_window() {
        let start = Instant::now();
        let mut window = RestartWindow::new(3, Duration::from_secs(60));
        assert!(window.try_acquire(start));
        assert!(window.try_acquire(start + Duration::from_secs(1)));
        assert!(window.try_acquire(start + Duration::from_secs(2)));
        assert!(!window.try_acquire(start + Duration::from_secs(3)));
        // The first restart leaves the window
        assert!(window.try_acquire(start + Duration::from_secs(60)));
        assert!(!window.try_acquire(start + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let engine = engine();
        assert!(!engine.is_running());

        let addr = engine.start("A").await.unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.local_addr(), Some(addr));
        assert_eq!(engine.current_resolver(), Some("1.1.1.1".parse().unwrap()));
        assert_eq!(engine.current_group().as_deref(), Some("A"));

        assert!(engine.start("A").await.is_err());

        engine.stop().await;
        let state = engine.state();
        assert_eq!(state.phase, RelayPhase::Stopped);
        assert!(state.local_addr.is_none());
    }

    #[tokio::test]
    async fn test_start_fails_when_all_ports_taken() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = RelayConfig {
            ports: vec![port, port],
            ..local_config()
        };
        let engine = RelayEngine::new(config, GroupConfig::default(), EventBus::new());

        let result = engine.start("A").await;
        assert!(matches!(result, Err(Error::Bind(2))));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_port_order_skips_busy_port() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = RelayConfig {
            ports: vec![port, 0],
            ..local_config()
        };
        let engine = RelayEngine::new(config, GroupConfig::default(), EventBus::new());

        let addr = engine.start("A").await.unwrap();
        assert_ne!(addr.port(), port);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_soft_restart_switches_group() {
        let engine = engine();
        engine.start("A").await.unwrap();

        let outcome = engine.soft_restart(Some("B")).await.unwrap();
        assert!(matches!(outcome, RestartOutcome::Restarted(_)));
        assert!(engine.is_running());
        assert_eq!(engine.current_resolver(), Some("8.8.4.4".parse().unwrap()));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_soft_restart_when_stopped() {
        let engine = engine();
        let outcome = engine.soft_restart(None).await.unwrap();
        assert_eq!(outcome, RestartOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_restart_storm_is_refused() {
        let engine = engine();
        engine.start("A").await.unwrap();

        for _ in 0..3 {
            let outcome = engine.soft_restart(None).await.unwrap();
            assert!(matches!(outcome, RestartOutcome::Restarted(_)));
        }
        assert_eq!(
            engine.soft_restart(None).await.unwrap(),
            RestartOutcome::RateLimited
        );
        assert!(engine.is_running());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_during_soft_restart_aborts_it() {
        let config = RelayConfig {
            restart_settle_ms: 300,
            ..local_config()
        };
        let engine = RelayEngine::new(config, GroupConfig::default(), EventBus::new());
        engine.start("A").await.unwrap();

        let restarting = Arc::clone(&engine);
        let restart = tokio::spawn(async move { restarting.soft_restart(Some("B")).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.state().phase, RelayPhase::Restarting);

        engine.stop().await;
        let outcome = restart.await.unwrap().unwrap();
        assert_eq!(outcome, RestartOutcome::NotRunning);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_recovery_rebinds_with_same_resolvers() {
        let engine = engine();
        engine.start("B").await.unwrap();

        let generation = engine.generation.load(Ordering::SeqCst);
        engine.recover(generation).await;

        assert!(engine.is_running());
        assert_eq!(engine.current_group().as_deref(), Some("B"));
        assert_ne!(engine.generation.load(Ordering::SeqCst), generation);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_crashed_relay_is_not_running_until_recovered() {
        let engine = engine();
        engine.start("A").await.unwrap();
        let generation = engine.generation.load(Ordering::SeqCst);

        engine.mark_crashed(generation);
        assert_eq!(engine.state().phase, RelayPhase::Starting);
        assert!(engine.local_addr().is_none());

        engine.recover(generation).await;
        assert!(engine.is_running());
        assert!(engine.local_addr().is_some());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stale_recovery_is_ignored() {
        let engine = engine();
        engine.start("A").await.unwrap();
        let generation = engine.generation.load(Ordering::SeqCst);
        engine.stop().await;

        engine.recover(generation).await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_unknown_group_uses_hybrid_list() {
        let engine = engine();
        engine.start("Z").await.unwrap();
        assert_eq!(engine.current_resolver(), Some("1.1.1.1".parse().unwrap()));
        engine.stop().await;
    }
}
