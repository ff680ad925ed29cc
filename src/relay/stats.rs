//! Relay query counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by every query handler.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    fallback: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Cumulative upstream time in microseconds for averaging.
    total_upstream_us: AtomicU64,
}

impl RelayStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A reply came from the active resolver list.
    pub fn record_forwarded(&self, upstream_ms: f64) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.add_time(upstream_ms);
    }

    /// A reply came from the fallback list.
    pub fn record_fallback(&self, upstream_ms: f64) {
        self.fallback.fetch_add(1, Ordering::Relaxed);
        self.add_time(upstream_ms);
    }

    /// Every resolver failed.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// The worker pool had no room for the query.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(&self, upstream_ms: f64) {
        self.total_upstream_us
            .fetch_add((upstream_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let forwarded = self.forwarded.load(Ordering::Relaxed);
        let fallback = self.fallback.load(Ordering::Relaxed);
        let total_us = self.total_upstream_us.load(Ordering::Relaxed);
        let answered = forwarded + fallback;

        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded,
            fallback,
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            avg_upstream_ms: if answered > 0 {
                (total_us as f64 / answered as f64) / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub fallback: u64,
    pub failed: u64,
    pub dropped: u64,
    pub avg_upstream_ms: f64,
}
