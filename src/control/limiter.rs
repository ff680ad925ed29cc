//! Switch-rate limiter and evaluation circuit breaker.
//!
//! Both take the current instant as an argument instead of reading the
//! clock, and expire lazily on the next call.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window limit on resolver switches.
///
/// Hitting the limit disables auto-switching for a cool-down; the window is
/// cleared when it re-enables.
#[derive(Debug)]
pub struct SwitchLimiter {
    switches: VecDeque<Instant>,
    max_switches: usize,
    window: Duration,
    cooldown: Duration,
    disabled_until: Option<Instant>,
}

impl SwitchLimiter {
    #[must_use]
    pub fn new(max_switches: usize, window: Duration, cooldown: Duration) -> Self {
        Self {
            switches: VecDeque::new(),
            max_switches,
            window,
            cooldown,
            disabled_until: None,
        }
    }

    /// Drop switch records older than the window.
    pub fn purge(&mut self, now: Instant) {
        while self
            .switches
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) > self.window)
        {
            self.switches.pop_front();
        }
    }

    /// Whether auto-switching is enabled at `now`. Re-enables after the cool-down.
    pub fn is_enabled(&mut self, now: Instant) -> bool {
        match self.disabled_until {
            Some(until) if now < until => false,
            Some(_) => {
                tracing::info!("Auto-switch re-enabled");
                self.disabled_until = None;
                self.switches.clear();
                true
            }
            None => true,
        }
    }

    /// Check whether a switch may happen at `now`.
    ///
    /// Refusing because the window is full disables auto-switching.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !self.is_enabled(now) {
            return false;
        }
        self.purge(now);
        if self.switches.len() >= self.max_switches {
            tracing::warn!(
                "Switch limit reached ({} in {:?}), auto-switch disabled for {:?}",
                self.switches.len(),
                self.window,
                self.cooldown
            );
            self.disabled_until = Some(now + self.cooldown);
            return false;
        }
        true
    }

    /// Record a switch made at `now`.
    pub fn record(&mut self, now: Instant) {
        self.switches.push_back(now);
    }

    /// Switches currently inside the window.
    #[must_use]
    pub fn count(&self) -> usize {
        self.switches.len()
    }

    pub fn reset(&mut self) {
        self.switches.clear();
        self.disabled_until = None;
    }
}

/// Opens after `threshold` consecutive evaluation failures and closes again
/// `reset_after` later.
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: u32,
    threshold: u32,
    reset_after: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
            reset_after,
            opened_at: None,
        }
    }

    /// Whether an evaluation may run at `now`.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) < self.reset_after => false,
            Some(_) => {
                tracing::info!("Circuit breaker reset");
                self.reset();
                true
            }
            None => true,
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failures += 1;
        if self.failures >= self.threshold && self.opened_at.is_none() {
            tracing::warn!("Circuit breaker open after {} failures", self.failures);
            self.opened_at = Some(now);
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter() -> SwitchLimiter {
        SwitchLimiter::new(5, 30 * MINUTE, 30 * MINUTE)
    }

    #[test]
    fn test_sixth_switch_in_window_is_refused() {
        let start = Instant::now();
        let mut limiter = limiter();

        for i in 0..5 {
            let now = start + i * MINUTE;
            assert!(limiter.try_acquire(now));
            limiter.record(now);
        }
        assert!(!limiter.try_acquire(start + 6 * MINUTE));
        assert!(!limiter.is_enabled(start + 10 * MINUTE));
        // Still disabled even though the early switches have aged out
        assert!(!limiter.try_acquire(start + 35 * MINUTE));
        assert!(limiter.try_acquire(start + 36 * MINUTE));
        assert_eq!(limiter.count(), 0);
    }

    #[test]
    fn test_old_switches_are_purged() {
        let start = Instant::now();
        let mut limiter = limiter();
        for i in 0..4 {
            limiter.record(start + i * MINUTE);
        }

        // Records exactly 30 minutes old stay in the window
        limiter.purge(start + 32 * MINUTE);
        assert_eq!(limiter.count(), 2);
        assert!(limiter.try_acquire(start + 32 * MINUTE));
    }

    #[test]
    fn test_breaker_trips_and_resets() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(3, 30 * MINUTE);

        for _ in 0..3 {
            assert!(breaker.allow(start));
            breaker.record_failure(start);
        }
        assert!(breaker.is_open());
        assert!(!breaker.allow(start + 10 * MINUTE));
        assert!(!breaker.allow(start + 29 * MINUTE));

        assert!(breaker.allow(start + 30 * MINUTE));
        assert_eq!(breaker.failures(), 0);
        // One more failure is counted normally without re-tripping
        breaker.record_failure(start + 31 * MINUTE);
        assert!(!breaker.is_open());
        assert!(breaker.allow(start + 31 * MINUTE));
    }

    #[test]
    fn test_success_clears_failures() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(3, 30 * MINUTE);
        breaker.record_failure(start);
        breaker.record_failure(start);
        breaker.record_success();
        breaker.record_failure(start);
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 1);
    }
}
