//! Command-line interface (CLI) argument parsing module.
//!
//! This module provides CLI argument parsing using `clap`.
//! It supports running the relay, one-off quality checks, candidate
//! selection, peak-hour and reachability diagnostics, and config export.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// CLI argument parser using clap derive macro.
///
/// # Example
///
/// ```ignore
/// let cli = Cli::parse();
/// match cli.command {
///     Commands::Run { group, .. } => { /* ... */ }
///     Commands::Check { resolver, .. } => { /* ... */ }
///     _ => { /* ... */ }
/// }
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "dnspilot",
    version,
    about = "Self-healing DNS forwarding relay",
    long_about = "A DNS forwarding relay that scores its upstream resolvers and fails over to a better group when quality degrades",
    infer_subcommands = true
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "DNSPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default, human-readable)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Get all available output format names.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &["table", "json"]
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown format: {}. Valid options are: {:?}",
                s,
                Self::names()
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Available commands for the dnspilot CLI.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the relay and the health monitor until Ctrl-C
    #[command(alias = "r")]
    Run {
        /// Resolver group to start with: A, B or auto
        #[arg(short, long, default_value = "auto")]
        group: String,
    },

    /// Grade one resolver
    ///
    /// Runs a full check by default, or the lighter peak-hour quick check.
    #[command(alias = "c")]
    Check {
        /// Resolver address
        resolver: IpAddr,

        /// Use the quick check
        #[arg(long)]
        quick: bool,
    },

    /// Grade every candidate and pick the best one
    #[command(alias = "s")]
    Select {
        /// Use the peak-hour candidate list and quick checks
        #[arg(long)]
        peak: bool,
    },

    /// Show whether it is peak hour now
    Peak,

    /// ICMP round-trip to every IPv4 candidate
    ///
    /// Needs permission to open ICMP sockets.
    #[command(alias = "p")]
    Ping {
        /// Number of pings per resolver
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,

        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Export the effective configuration
    #[command(alias = "e")]
    Config {
        /// Output file path
        #[arg(short, long, default_value = "dnspilot.json")]
        output: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Parse CLI arguments and return verbose flag.
///
/// # Returns
///
/// Returns a tuple of `(Cli, verbose)` where `verbose` indicates
/// whether verbose logging was enabled.
#[must_use]
pub fn parse_verbose() -> (Cli, bool) {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    (cli, verbose)
}
