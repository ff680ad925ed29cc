//! Configuration module.
//!
//! This module provides the configuration model and the functionality
//! for loading it from various sources.

pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    CandidateConfig, ControlConfig, DomainSets, GroupConfig, LatencyBand, PeakConfig,
    PeakWindow, PilotConfig, RelayConfig, ScoringConfig,
};
