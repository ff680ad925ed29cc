//! Error types module.
//!
//! This module defines the error types used throughout dnspilot.
//! It uses `thiserror` for structured error handling and provides
//! a custom `Result` type alias for convenience.

use thiserror::Error;

/// A specialized `Result` type for dnspilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for dnspilot.
///
/// Probe, scoring and selection failures are recovered where they happen and
/// never show up here; these variants cover what a caller can actually act on.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (configuration files, JSON output)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// DNS resolver error (resolver construction or lookup failures)
    #[error("DNS resolver error: {0}")]
    Resolver(#[from] trust_dns_resolver::error::ResolveError),

    /// Network-related error (ICMP client, socket setup)
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error (invalid config, missing files)
    #[error("Config error: {0}")]
    Config(String),

    /// No port in the acquisition order could be bound.
    #[error("Failed to bind relay socket: all {0} candidate ports are in use")]
    Bind(usize),

    /// Relay lifecycle error (unknown group, relay not running)
    #[error("Relay error: {0}")]
    Relay(String),

    /// Operation timed out (resolver evaluation)
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new network error with a message.
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new relay error with a message.
    #[must_use]
    pub fn relay(msg: impl Into<String>) -> Self {
        Self::Relay(msg.into())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
