//! Configuration loader.
//!
//! This module provides functionality to load the relay configuration
//! from JSON files or default locations, and to export it again.

use crate::config::model::PilotConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// File name looked up inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Fallback file name in the current directory.
const LOCAL_CONFIG_FILE: &str = "dnspilot.json";

/// Configuration loader.
///
/// Provides methods to load, validate and save a [`PilotConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a JSON file.
    ///
    /// Missing fields take their built-in defaults. The result is validated
    /// before it is returned.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ConfigLoader::load_from_file("dnspilot.json")?;
    /// println!("ports: {:?}", config.relay.ports);
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<PilotConfig> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PilotConfig = serde_json::from_str(&content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from the default locations.
    ///
    /// Searches in the following order:
    /// 1. `$CONFIG_DIR/dnspilot/config.json`
    /// 2. `dnspilot.json` in current directory
    /// 3. Built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error only if a file exists but is invalid.
    pub fn load_default() -> Result<PilotConfig> {
        for path in [Self::config_dir().join(CONFIG_FILE), PathBuf::from(LOCAL_CONFIG_FILE)] {
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load_from_file(path);
            }
        }
        tracing::debug!("No config file found, using built-in defaults");
        Ok(PilotConfig::default())
    }

    /// Load from an explicit path when given, otherwise from the default locations.
    pub fn load(path: Option<&Path>) -> Result<PilotConfig> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Get the config directory path.
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dnspilot")
    }

    /// Write a configuration as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(config: &PilotConfig, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Check the values the relay cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(config: &PilotConfig) -> Result<()> {
        if config.relay.ports.is_empty() {
            return Err(Error::config("relay.ports must list at least one port"));
        }
        if config.groups.groups.is_empty() {
            return Err(Error::config("groups must define at least one resolver group"));
        }
        if let Some((name, _)) = config.groups.groups.iter().find(|(_, s)| s.is_empty()) {
            return Err(Error::config(format!("group {name} has no resolvers")));
        }
        if config.relay.forward_timeout_ms == 0
            || config.scoring.full_timeout_ms == 0
            || config.scoring.quick_timeout_ms == 0
            || config.control.evaluation_timeout_ms == 0
        {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        if config.control.health_interval_secs == 0
            || config.control.cleanup_interval_secs == 0
            || config.control.switch_window_secs == 0
            || config.relay.restart_window_secs == 0
        {
            return Err(Error::config("intervals and windows must be greater than zero"));
        }
        if config.relay.max_in_flight == 0 || config.scoring.max_parallel_checks == 0 {
            return Err(Error::config("worker pool sizes must be greater than zero"));
        }
        if config.scoring.history_capacity == 0 {
            return Err(Error::config("scoring.history_capacity must be greater than zero"));
        }
        Ok(())
    }
}
