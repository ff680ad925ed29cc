//! DNS quality module.
//!
//! This module provides resolver quality measurement:
//! - Domain probes against a specific resolver
//! - Rolling latency history and trend scores
//! - Full and quick quality scoring
//! - Concurrent candidate selection
//! - ICMP reachability diagnostics

pub mod history;
pub mod ping;
pub mod probe;
pub mod scorer;
pub mod selector;
pub mod types;

pub use history::HistoryStore;
pub use ping::{PingResult, ReachabilityTester};
pub use probe::{DomainProbe, ResolverProbe};
pub use scorer::{QualityGrader, QualityScorer};
pub use selector::{CandidateSelector, Selection};
pub use types::*;
