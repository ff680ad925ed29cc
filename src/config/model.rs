//! Configuration data model.
//!
//! Every section carries `#[serde(default)]` so a partial JSON file only
//! overrides the values it names. The built-in defaults are the production
//! tuning of the relay.

use crate::dns::ResolverCandidate;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Top-level dnspilot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    /// Domain sets used for probing
    pub domains: DomainSets,
    /// Resolver groups and the address-to-group table
    pub groups: GroupConfig,
    /// Resolver candidates evaluated by the selector
    pub candidates: CandidateConfig,
    /// Relay engine settings
    pub relay: RelayConfig,
    /// Quality scoring settings
    pub scoring: ScoringConfig,
    /// Switch controller settings
    pub control: ControlConfig,
    /// Peak-hour schedule
    pub peak: PeakConfig,
}

/// Domain lists probed by the scorer and the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DomainSets {
    /// The two most important domains, used by quick checks and the health tick
    pub critical: Vec<String>,
    /// The "target" group probed by full checks
    pub extended: Vec<String>,
    /// General-purpose domains probed alongside the target group
    pub standard: Vec<String>,
}

impl Default for DomainSets {
    fn default() -> Self {
        Self {
            critical: strings(&[
                "perseus-productanalytics.deliveryhero.net",
                "my.usehurrier.com",
            ]),
            extended: strings(&[
                "perseus-productanalytics.deliveryhero.net",
                "my.usehurrier.com",
                "service2.us.incognia.com",
                "api.mapbox.com",
                "deliveryhero.net",
            ]),
            standard: strings(&["google.com", "cloudflare.com"]),
        }
    }
}

/// Named resolver groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GroupConfig {
    /// Resolver lists keyed by group name, in forwarding order
    pub groups: BTreeMap<String, Vec<IpAddr>>,
    /// List used when a group name is not configured
    pub hybrid: Vec<IpAddr>,
    /// Fixed mapping from a winning resolver address to its group
    pub address_groups: BTreeMap<IpAddr, String>,
    /// Group for addresses missing from `address_groups` and every group list
    pub unmapped_group: String,
}

impl GroupConfig {
    /// Resolver list for a group, falling back to the hybrid list for unknown names.
    #[must_use]
    pub fn servers_for(&self, group: &str) -> Vec<IpAddr> {
        self.groups
            .get(&group.to_uppercase())
            .or_else(|| self.groups.get(group))
            .cloned()
            .unwrap_or_else(|| self.hybrid.clone())
    }

    /// Map a resolver address to the group that should serve it.
    #[must_use]
    pub fn group_for(&self, addr: IpAddr) -> String {
        if let Some(group) = self.address_groups.get(&addr) {
            return group.clone();
        }
        self.groups
            .iter()
            .find(|(_, servers)| servers.contains(&addr))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| self.unmapped_group.clone())
    }

    /// The candidate for `addr`, tagged with the group that serves it.
    #[must_use]
    pub fn candidate(&self, addr: IpAddr) -> ResolverCandidate {
        ResolverCandidate::new(addr, self.group_for(addr))
    }

    /// Whether the group name is configured.
    #[must_use]
    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group) || self.groups.contains_key(&group.to_uppercase())
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            "A".to_string(),
            ips(&[
                "1.1.1.1",
                "1.0.0.1",
                "2606:4700:4700::1111",
                "2606:4700:4700::1001",
            ]),
        );
        groups.insert("B".to_string(), ips(&["8.8.4.4", "2001:4860:4860::8844"]));

        let mut address_groups = BTreeMap::new();
        for (addr, group) in [
            ("1.1.1.1", "A"),
            ("1.0.0.1", "A"),
            ("8.8.8.8", "B"),
            ("8.8.4.4", "B"),
        ] {
            if let Ok(ip) = addr.parse() {
                address_groups.insert(ip, group.to_string());
            }
        }

        Self {
            groups,
            hybrid: ips(&["1.1.1.1", "1.0.0.1", "8.8.4.4"]),
            address_groups,
            unmapped_group: "B".to_string(),
        }
    }
}

/// Candidate resolvers considered by the selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CandidateConfig {
    /// Candidates outside peak hour
    pub normal: Vec<IpAddr>,
    /// Smaller candidate list used during peak hour
    pub peak: Vec<IpAddr>,
    /// Resolver returned when nothing usable is found
    pub default_resolver: IpAddr,
}

impl CandidateConfig {
    /// Candidate list for the given mode.
    #[must_use]
    pub fn for_mode(&self, peak_hour: bool) -> &[IpAddr] {
        if peak_hour {
            &self.peak
        } else {
            &self.normal
        }
    }
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            normal: ips(&[
                "1.1.1.1",
                "1.0.0.1",
                "8.8.8.8",
                "8.8.4.4",
                "185.222.222.222",
                "202.188.0.133",
            ]),
            peak: ips(&["1.1.1.1", "8.8.8.8", "185.222.222.222"]),
            default_resolver: IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
        }
    }
}

/// Relay engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Local address the listening socket binds to
    pub bind_addr: IpAddr,
    /// Ports tried in order until one binds
    pub ports: Vec<u16>,
    /// Port the upstream resolvers listen on
    pub upstream_port: u16,
    /// Per-resolver forward timeout in milliseconds
    pub forward_timeout_ms: u64,
    /// Resolvers tried once more when the whole active list fails
    pub fallback: Vec<IpAddr>,
    /// Maximum number of queries handled concurrently
    pub max_in_flight: usize,
    /// Delay before restarting a crashed worker, in milliseconds
    pub crash_restart_delay_ms: u64,
    /// Delay before retrying a failed crash recovery, in milliseconds
    pub recovery_retry_delay_ms: u64,
    /// Pause between teardown and rebind during a soft restart, in milliseconds
    pub restart_settle_ms: u64,
    /// Bounded wait for the worker to exit, in milliseconds
    pub join_timeout_ms: u64,
    /// Soft restarts allowed per restart window
    pub max_restarts: usize,
    /// Restart window length in seconds
    pub restart_window_secs: u64,
}

impl RelayConfig {
    #[must_use]
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    #[must_use]
    pub fn crash_restart_delay(&self) -> Duration {
        Duration::from_millis(self.crash_restart_delay_ms)
    }

    #[must_use]
    pub fn recovery_retry_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_retry_delay_ms)
    }

    #[must_use]
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    #[must_use]
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    /// Socket address of an upstream resolver.
    #[must_use]
    pub fn upstream_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.upstream_port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports: vec![5353, 5354, 5355, 9999, 53535, 53536, 53537, 53538],
            upstream_port: 53,
            forward_timeout_ms: 3_000,
            fallback: ips(&["1.1.1.1", "8.8.4.4", "1.0.0.1"]),
            max_in_flight: 64,
            crash_restart_delay_ms: 5_000,
            recovery_retry_delay_ms: 3_000,
            restart_settle_ms: 500,
            join_timeout_ms: 2_000,
            max_restarts: 3,
            restart_window_secs: 60,
        }
    }
}

/// Inclusive latency band in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatencyBand {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyBand {
    #[must_use]
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Whether a latency falls inside the band.
    #[must_use]
    pub const fn contains(&self, latency_ms: u64) -> bool {
        latency_ms >= self.min_ms && latency_ms <= self.max_ms
    }
}

/// Quality scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Bound on a whole full check, in milliseconds
    pub full_timeout_ms: u64,
    /// Bound on a whole quick check, in milliseconds
    pub quick_timeout_ms: u64,
    /// Bound on a single domain lookup, in milliseconds
    pub probe_timeout_ms: u64,
    /// Accepted latency band for full checks
    pub full_band: LatencyBand,
    /// Accepted latency band for quick checks
    pub quick_band: LatencyBand,
    /// Selection-wide timeout outside peak hour, in milliseconds
    pub selection_timeout_ms: u64,
    /// Selection-wide timeout during peak hour, in milliseconds
    pub peak_selection_timeout_ms: u64,
    /// Latency samples kept per resolver
    pub history_capacity: usize,
    /// Maximum number of candidates scored at once
    pub max_parallel_checks: usize,
}

impl ScoringConfig {
    #[must_use]
    pub fn full_timeout(&self) -> Duration {
        Duration::from_millis(self.full_timeout_ms)
    }

    #[must_use]
    pub fn quick_timeout(&self) -> Duration {
        Duration::from_millis(self.quick_timeout_ms)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Selection-wide timeout for the given mode.
    #[must_use]
    pub fn selection_timeout(&self, peak_hour: bool) -> Duration {
        if peak_hour {
            Duration::from_millis(self.peak_selection_timeout_ms)
        } else {
            Duration::from_millis(self.selection_timeout_ms)
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            full_timeout_ms: 4_000,
            quick_timeout_ms: 3_000,
            probe_timeout_ms: 3_000,
            full_band: LatencyBand::new(10, 1000),
            quick_band: LatencyBand::new(10, 800),
            selection_timeout_ms: 12_000,
            peak_selection_timeout_ms: 8_000,
            history_capacity: 30,
            max_parallel_checks: 8,
        }
    }
}

/// Switch controller settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlConfig {
    /// Health-check period in seconds
    pub health_interval_secs: u64,
    /// Bound on one evaluation, in milliseconds
    pub evaluation_timeout_ms: u64,
    /// Minimum score gap to switch outside peak hour
    pub switch_threshold: i32,
    /// Minimum score gap to switch during peak hour
    pub peak_switch_threshold: i32,
    /// Switches allowed inside the switch window
    pub max_switches: usize,
    /// Sliding switch window in seconds
    pub switch_window_secs: u64,
    /// How long auto-switching stays disabled after the limit is hit, in seconds
    pub auto_switch_cooldown_secs: u64,
    /// Consecutive evaluation failures that open the circuit breaker
    pub breaker_threshold: u32,
    /// Seconds after tripping before the breaker closes again
    pub breaker_reset_secs: u64,
    /// Period of the switch-window cleanup task, in seconds
    pub cleanup_interval_secs: u64,
    /// Accepted latency band for the critical-domain health probe
    pub health_band: LatencyBand,
}

impl ControlConfig {
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    #[must_use]
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    #[must_use]
    pub fn switch_window(&self) -> Duration {
        Duration::from_secs(self.switch_window_secs)
    }

    #[must_use]
    pub fn auto_switch_cooldown(&self) -> Duration {
        Duration::from_secs(self.auto_switch_cooldown_secs)
    }

    #[must_use]
    pub fn breaker_reset(&self) -> Duration {
        Duration::from_secs(self.breaker_reset_secs)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Switch threshold for the given mode.
    #[must_use]
    pub const fn threshold(&self, peak_hour: bool) -> i32 {
        if peak_hour {
            self.peak_switch_threshold
        } else {
            self.switch_threshold
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 600,
            evaluation_timeout_ms: 10_000,
            switch_threshold: 20,
            peak_switch_threshold: 30,
            max_switches: 5,
            switch_window_secs: 1_800,
            auto_switch_cooldown_secs: 1_800,
            breaker_threshold: 3,
            breaker_reset_secs: 1_800,
            cleanup_interval_secs: 300,
            health_band: LatencyBand::new(10, 500),
        }
    }
}

/// A local-time interval, both ends inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeakWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PeakWindow {
    #[must_use]
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Self {
        Self {
            start: hm(start.0, start.1),
            end: hm(end.0, end.1),
        }
    }
}

/// Peak-hour schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PeakConfig {
    /// Offset of the schedule's local clock from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Intervals applying Monday to Friday
    pub weekday: Vec<PeakWindow>,
    /// Intervals applying Saturday and Sunday
    pub weekend: Vec<PeakWindow>,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            // Asia/Kuala_Lumpur, no daylight saving
            utc_offset_minutes: 480,
            weekday: vec![
                PeakWindow::new((6, 30), (9, 0)),
                PeakWindow::new((11, 30), (14, 0)),
                PeakWindow::new((16, 30), (19, 0)),
                PeakWindow::new((19, 30), (21, 30)),
            ],
            weekend: vec![
                PeakWindow::new((6, 30), (10, 0)),
                PeakWindow::new((11, 30), (14, 0)),
                PeakWindow::new((16, 30), (19, 0)),
                PeakWindow::new((19, 30), (22, 30)),
            ],
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn ips(items: &[&str]) -> Vec<IpAddr> {
    items.iter().filter_map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_lookup() {
        let groups = GroupConfig::default();
        assert_eq!(groups.servers_for("A")[0].to_string(), "1.1.1.1");
        assert_eq!(groups.servers_for("b")[0].to_string(), "8.8.4.4");
        assert_eq!(groups.servers_for("nope"), groups.hybrid);
        assert!(groups.contains("a"));
        assert!(!groups.contains("C"));
    }

    #[test]
    fn test_group_for_address() {
        let groups = GroupConfig::default();
        assert_eq!(groups.group_for("1.0.0.1".parse().unwrap()), "A");
        assert_eq!(groups.group_for("8.8.8.8".parse().unwrap()), "B");
        assert_eq!(
            groups.group_for("2606:4700:4700::1111".parse().unwrap()),
            "A"
        );
        assert_eq!(groups.group_for("185.222.222.222".parse().unwrap()), "B");

        let candidate = groups.candidate("8.8.4.4".parse().unwrap());
        assert_eq!(candidate, ResolverCandidate::new("8.8.4.4".parse().unwrap(), "B"));
        assert_eq!(candidate.to_string(), "8.8.4.4 (group B)");
    }

    #[test]
    fn test_latency_band_inclusive() {
        let band = LatencyBand::new(10, 1000);
        assert!(band.contains(10));
        assert!(band.contains(1000));
        assert!(!band.contains(9));
        assert!(!band.contains(1001));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "relay": { "ports": [6053] }, "control": { "switch_threshold": 25 } }"#;
        let config: PilotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relay.ports, vec![6053]);
        assert_eq!(config.relay.upstream_port, 53);
        assert_eq!(config.control.threshold(false), 25);
        assert_eq!(config.control.threshold(true), 30);
        assert_eq!(config.domains.extended.len(), 5);
    }
}
