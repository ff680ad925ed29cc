//! ICMP reachability of resolver candidates.
//!
//! Diagnostic only: the relay never uses these numbers for scoring. Sending
//! ICMP packets typically needs root or raw socket access.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use tokio::time::timeout;

/// Default packet size for ping in bytes.
const DEFAULT_PACKET_SIZE: usize = 32;

/// Default timeout for each ping attempt in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 2;

/// Default number of ping attempts per resolver.
const DEFAULT_PING_COUNT: usize = 3;

/// Round-trip measurement of one resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    /// Resolver that was pinged
    pub resolver: IpAddr,
    /// Average round-trip time in milliseconds (None if all attempts failed)
    pub latency_ms: Option<f64>,
    /// Packet loss ratio (0.0 = no loss, 1.0 = all lost)
    pub packet_loss: f64,
    /// Whether at least one reply arrived
    pub success: bool,
    /// Error message if the test failed
    pub error: Option<String>,
}

impl PingResult {
    #[must_use]
    pub fn success(resolver: IpAddr, latency_ms: f64, packet_loss: f64) -> Self {
        Self {
            resolver,
            latency_ms: Some(latency_ms),
            packet_loss,
            success: true,
            error: None,
        }
    }

    pub fn failure(resolver: IpAddr, error: impl Into<String>) -> Self {
        Self {
            resolver,
            latency_ms: None,
            packet_loss: 1.0,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// ICMP pinger for resolver candidates.
///
/// # Example
///
/// ```ignore
/// let pinger = ReachabilityTester::new()?;
/// let result = pinger.ping("1.1.1.1".parse()?).await;
/// ```
pub struct ReachabilityTester {
    client: Client,
    timeout: Duration,
    ping_count: usize,
}

impl ReachabilityTester {
    /// Create a tester with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the ICMP client cannot be initialized
    /// (e.g., due to insufficient permissions).
    pub fn new() -> Result<Self> {
        Self::with_settings(Duration::from_secs(DEFAULT_TIMEOUT_SECS), DEFAULT_PING_COUNT)
    }

    /// Create a tester with a per-attempt timeout and attempt count.
    pub fn with_settings(timeout: Duration, ping_count: usize) -> Result<Self> {
        let client = Client::new(&Config::default()).map_err(|e| Error::network(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            ping_count: ping_count.max(1),
        })
    }

    /// Ping one resolver `ping_count` times and average the replies.
    pub async fn ping(&self, resolver: IpAddr) -> PingResult {
        // IPv6 candidates are not probed
        if resolver.is_ipv6() {
            return PingResult::failure(resolver, "IPv6 not probed");
        }

        let payload = [0u8; DEFAULT_PACKET_SIZE];
        let mut latencies = Vec::with_capacity(self.ping_count);

        for seq in 0..self.ping_count {
            let mut pinger = self.client.pinger(resolver, PingIdentifier(rand_id())).await;
            pinger.timeout(self.timeout);

            let start = Instant::now();
            match timeout(self.timeout, pinger.ping(PingSequence(seq as u16), &payload)).await {
                Ok(Ok(_)) => latencies.push(start.elapsed().as_secs_f64() * 1000.0),
                Ok(Err(e)) => tracing::debug!("Ping error for {resolver}: {e}"),
                Err(_) => tracing::debug!("Ping timeout for {resolver}"),
            }
        }

        let packet_loss = 1.0 - (latencies.len() as f64 / self.ping_count as f64);
        if latencies.is_empty() {
            PingResult::failure(resolver, "timeout")
        } else {
            let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
            PingResult::success(resolver, avg, packet_loss)
        }
    }

    /// Ping resolvers one after another.
    pub async fn ping_all(&self, resolvers: &[IpAddr]) -> Vec<PingResult> {
        let mut results = Vec::with_capacity(resolvers.len());
        for &resolver in resolvers {
            results.push(self.ping(resolver).await);
        }
        results
    }
}

/// Generate a ping identifier from the clock.
fn rand_id() -> u16 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    (nanos % 65536) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_localhost() {
        // This test requires ICMP socket permissions which are not available in CI
        if std::env::var("CI").is_ok() {
            return;
        }

        let Ok(tester) = ReachabilityTester::new() else {
            return;
        };
        let result = tester.ping("127.0.0.1".parse().unwrap()).await;

        if result.success {
            assert!(result.latency_ms.unwrap() < 10.0);
        }
    }

    #[test]
    fn test_ping_result() {
        let resolver: IpAddr = "8.8.8.8".parse().unwrap();

        let ok = PingResult::success(resolver, 10.0, 0.0);
        assert!(ok.success);
        assert_eq!(ok.latency_ms, Some(10.0));
        assert!(ok.error.is_none());

        let failed = PingResult::failure(resolver, "timeout");
        assert!(!failed.success);
        assert!(failed.latency_ms.is_none());
        assert_eq!(failed.packet_loss, 1.0);
    }
}
