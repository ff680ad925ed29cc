//! DNS relay.
//!
//! A UDP listener that forwards every query verbatim to the active resolver
//! group and sends the first reply back to the client.

pub mod engine;
pub mod forward;
pub mod stats;

pub use engine::{NoReclaim, PortReclaimer, RelayEngine, RelayPhase, RelayState, RestartOutcome};
pub use forward::{forward_query, ForwardOutcome, MAX_DNS_PACKET_SIZE};
pub use stats::{RelayStats, StatsSnapshot};
