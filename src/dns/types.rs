//! DNS quality types and data structures.
//!
//! This module provides the core types used for resolver candidates,
//! probe outcomes and quality results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Latency reported when no probe produced a usable sample.
pub const FAILED_LATENCY_MS: u64 = 999;

/// A resolver address and the group it is switched with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolverCandidate {
    /// Resolver address (IPv4 or IPv6)
    pub ip: IpAddr,
    /// Group name, e.g. "A" or "B"
    pub group: String,
}

impl ResolverCandidate {
    /// Create a new candidate.
    pub fn new(ip: IpAddr, group: impl Into<String>) -> Self {
        Self {
            ip,
            group: group.into(),
        }
    }
}

impl fmt::Display for ResolverCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (group {})", self.ip, self.group)
    }
}

/// Which scoring pass produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Target and standard domain groups, full scoring
    Full,
    /// Critical domains only, used during peak hour
    Quick,
}

impl CheckMode {
    /// Mode matching the peak-hour flag.
    #[must_use]
    pub const fn for_peak(peak_hour: bool) -> Self {
        if peak_hour {
            Self::Quick
        } else {
            Self::Full
        }
    }
}

/// Outcome of resolving a single domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Domain that was resolved
    pub domain: String,
    /// Resolution succeeded and latency was inside the accepted band
    pub success: bool,
    /// The resolver returned an answer, in band or not
    pub resolved: bool,
    /// Observed latency in milliseconds
    pub latency_ms: u64,
}

impl ProbeResult {
    #[must_use]
    pub fn success(domain: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            domain: domain.into(),
            success: true,
            resolved: true,
            latency_ms,
        }
    }

    /// An answer whose latency fell outside the accepted band.
    #[must_use]
    pub fn out_of_band(domain: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            domain: domain.into(),
            success: false,
            resolved: true,
            latency_ms,
        }
    }

    #[must_use]
    pub fn failure(domain: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            domain: domain.into(),
            success: false,
            resolved: false,
            latency_ms,
        }
    }
}

/// Categorical quality label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityStatus {
    Failed,
    Unstable,
    Weak,
    Ok,
    Strong,
    Elite,
}

impl QualityStatus {
    /// Label for a full-check composite score.
    #[must_use]
    pub const fn from_full_score(score: u32) -> Self {
        match score {
            85.. => Self::Elite,
            70..=84 => Self::Strong,
            50..=69 => Self::Ok,
            30..=49 => Self::Weak,
            _ => Self::Unstable,
        }
    }

    /// Label for a quick-check score. Quick checks have no WEAK band.
    #[must_use]
    pub const fn from_quick_score(score: u32) -> Self {
        match score {
            85.. => Self::Elite,
            70..=84 => Self::Strong,
            50..=69 => Self::Ok,
            _ => Self::Unstable,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "FAILED",
            Self::Unstable => "UNSTABLE",
            Self::Weak => "WEAK",
            Self::Ok => "OK",
            Self::Strong => "STRONG",
            Self::Elite => "ELITE",
        }
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse health label derived from a quick check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthLabel {
    #[must_use]
    pub const fn from_score(score: u32) -> Self {
        match score {
            70.. => Self::Healthy,
            40..=69 => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

impl fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        };
        f.write_str(s)
    }
}

/// Graded quality of one resolver, built fresh by every scoring call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityResult {
    /// Resolver that was graded
    pub resolver: IpAddr,
    /// Pass that produced the result
    pub mode: CheckMode,
    /// Composite score, always within 0..=100
    pub score: u32,
    /// Average latency of the target group, or 999 when nothing succeeded
    pub avg_latency_ms: u64,
    /// Success rate of the target (or critical) group in percent
    pub target_success_rate: u32,
    /// Success rate of the standard group in percent
    pub standard_success_rate: u32,
    /// Whether the resolver clears the bar to serve traffic
    pub usable: bool,
    /// Categorical label
    pub status: QualityStatus,
}

impl QualityResult {
    /// Sentinel returned when scoring itself failed.
    #[must_use]
    pub fn failed(resolver: IpAddr, mode: CheckMode) -> Self {
        Self {
            resolver,
            mode,
            score: 0,
            avg_latency_ms: FAILED_LATENCY_MS,
            target_success_rate: 0,
            standard_success_rate: 0,
            usable: false,
            status: QualityStatus::Failed,
        }
    }

    /// Whether this is the scorer-failure sentinel.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == QualityStatus::Failed
    }

    /// Health label for the score.
    #[must_use]
    pub fn health(&self) -> HealthLabel {
        HealthLabel::from_score(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_status_bands() {
        assert_eq!(QualityStatus::from_full_score(100), QualityStatus::Elite);
        assert_eq!(QualityStatus::from_full_score(85), QualityStatus::Elite);
        assert_eq!(QualityStatus::from_full_score(84), QualityStatus::Strong);
        assert_eq!(QualityStatus::from_full_score(50), QualityStatus::Ok);
        assert_eq!(QualityStatus::from_full_score(30), QualityStatus::Weak);
        assert_eq!(QualityStatus::from_full_score(29), QualityStatus::Unstable);
    }

    #[test]
    fn test_quick_status_has_no_weak_band() {
        assert_eq!(QualityStatus::from_quick_score(40), QualityStatus::Unstable);
        assert_eq!(QualityStatus::from_quick_score(60), QualityStatus::Ok);
        assert_eq!(QualityStatus::from_quick_score(90), QualityStatus::Elite);
    }

    #[test]
    fn test_failed_sentinel() {
        let result = QualityResult::failed("1.1.1.1".parse().unwrap(), CheckMode::Full);
        assert!(result.is_failed());
        assert_eq!(result.score, 0);
        assert_eq!(result.avg_latency_ms, 999);
        assert!(!result.usable);
        assert_eq!(result.status.to_string(), "FAILED");
        assert_eq!(result.health(), HealthLabel::Unhealthy);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&QualityStatus::Strong).unwrap();
        assert_eq!(json, "\"STRONG\"");
    }
}
