//! Per-query forwarding.
//!
//! A query is sent to each resolver of the active list in order over one
//! ephemeral socket; the first reply wins. When the whole list fails the
//! fallback list gets one more pass. Replies are opaque bytes and are not
//! matched against the query's transaction id.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// A reply obtained for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutcome {
    /// Reply bytes, verbatim
    pub reply: Vec<u8>,
    /// Resolver that answered
    pub upstream: SocketAddr,
    /// Whether the answer came from the fallback list
    pub via_fallback: bool,
    /// Time spent upstream in milliseconds
    pub elapsed_ms: f64,
}

/// Transaction id of a query, for logging only. Zero for short packets.
#[must_use]
pub fn query_id(query: &[u8]) -> u16 {
    match query {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    }
}

/// Forward `query` through `upstreams`, then `fallback`, with `timeout` per resolver.
///
/// Returns `None` when nobody answered.
pub async fn forward_query(
    query: &[u8],
    upstreams: &[SocketAddr],
    fallback: &[SocketAddr],
    timeout: Duration,
) -> Option<ForwardOutcome> {
    let id = query_id(query);
    let socket = match bind_ephemeral(upstreams.first().or_else(|| fallback.first())).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("DNS handling error for #{id}: {e}");
            return None;
        }
    };

    let started = Instant::now();
    for &upstream in upstreams {
        match exchange(&socket, query, upstream, timeout).await {
            Ok(reply) => {
                tracing::debug!("DNS resolved via {upstream} for #{id}");
                return Some(ForwardOutcome {
                    reply,
                    upstream,
                    via_fallback: false,
                    elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                tracing::warn!("{upstream} timeout for #{id}");
            }
            Err(e) => tracing::warn!("{upstream} failed for #{id}: {e}"),
        }
    }

    for &upstream in fallback {
        if let Ok(reply) = exchange(&socket, query, upstream, timeout).await {
            tracing::debug!("Fallback DNS via {upstream} succeeded for #{id}");
            return Some(ForwardOutcome {
                reply,
                upstream,
                via_fallback: true,
                elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }
    }

    None
}

/// Send one query and wait up to `timeout` for any datagram back.
pub async fn exchange(
    socket: &UdpSocket,
    query: &[u8],
    upstream: SocketAddr,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    socket.send_to(query, upstream).await?;

    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    let (len, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream timeout"))??;
    buf.truncate(len);
    Ok(buf)
}

async fn bind_ephemeral(first: Option<&SocketAddr>) -> io::Result<UdpSocket> {
    match first {
        Some(SocketAddr::V6(_)) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await,
        _ => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await,
    }
}
