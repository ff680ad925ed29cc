//! Rolling per-resolver latency history.
//!
//! Every scoring call records its observed average latency here and bumps or
//! clears the resolver's consecutive-failure counter. The trend score derived
//! from the samples feeds back into the next composite score.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;

/// Default number of samples kept per resolver.
pub const DEFAULT_CAPACITY: usize = 30;

/// Trend score for a resolver without samples.
pub const NEUTRAL_TREND_SCORE: u32 = 50;

#[derive(Debug, Default, Clone)]
struct HistoryRecord {
    samples: VecDeque<u64>,
    consecutive_failures: u32,
}

/// Concurrent history store keyed by resolver address.
///
/// Each record is updated under its map shard lock, so a sample append and
/// the matching failure-counter change are seen together.
#[derive(Debug)]
pub struct HistoryStore {
    records: DashMap<IpAddr, HistoryRecord>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store keeping `capacity` samples per resolver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record one check outcome.
    ///
    /// Appends `latency_ms`, evicting the oldest sample once the record is
    /// full, then resets the failure counter when `ok` or increments it otherwise.
    pub fn record(&self, resolver: IpAddr, latency_ms: u64, ok: bool) {
        let mut record = self.records.entry(resolver).or_default();
        record.samples.push_back(latency_ms);
        while record.samples.len() > self.capacity {
            record.samples.pop_front();
        }
        if ok {
            record.consecutive_failures = 0;
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        }
    }

    /// Stored samples, oldest first.
    #[must_use]
    pub fn samples(&self, resolver: IpAddr) -> Vec<u64> {
        self.records
            .get(&resolver)
            .map(|r| r.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn consecutive_failures(&self, resolver: IpAddr) -> u32 {
        self.records
            .get(&resolver)
            .map_or(0, |r| r.consecutive_failures)
    }

    /// Stability score from the stored samples.
    ///
    /// Uses the mean and the population standard deviation (jitter) of the
    /// samples: 100 for mean < 150 and jitter < 50, 80 for mean < 300 and
    /// jitter < 100, 60 for mean < 500, otherwise 30. No samples gives 50.
    #[must_use]
    pub fn trend_score(&self, resolver: IpAddr) -> u32 {
        let samples = self.samples(resolver);
        trend_score(&samples)
    }

    /// Number of resolvers with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Trend score for a slice of latency samples.
#[must_use]
pub fn trend_score(samples: &[u64]) -> u32 {
    if samples.is_empty() {
        return NEUTRAL_TREND_SCORE;
    }

    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let jitter = variance.sqrt();

    if mean < 150.0 && jitter < 50.0 {
        100
    } else if mean < 300.0 && jitter < 100.0 {
        80
    } else if mean < 500.0 {
        60
    } else {
        30
    }
}
