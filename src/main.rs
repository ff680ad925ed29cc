//! dnspilot - self-healing DNS forwarding relay
//!
//! Binary entry point for the dnspilot CLI application.

#![warn(clippy::all, warnings)]
#![warn(clippy::pedantic, clippy::nursery)]

use clap::CommandFactory;
use dnspilot::cli::{Cli, Commands, OutputFormat};
use dnspilot::config::{ConfigLoader, PilotConfig};
use dnspilot::control::PeakSchedule;
use dnspilot::dns::{
    CandidateSelector, HistoryStore, PingResult, QualityResult, QualityScorer, ReachabilityTester,
    ResolverProbe,
};
use dnspilot::error::Result;
use dnspilot::events::StatusEvent;
use dnspilot::DnsPilot;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up logging based on verbosity level.
///
/// Logs go to stderr so `--format json` output stays parseable.
///
/// # Arguments
///
/// * `verbose` - Enable debug-level logging
/// * `quiet` - Enable error-level only logging
fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    } else if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().without_time().with_writer(std::io::stderr))
        .init();
}

fn scorer(config: &PilotConfig) -> QualityScorer {
    let probe = Arc::new(ResolverProbe::new(
        config.relay.upstream_port,
        config.scoring.probe_timeout(),
    ));
    QualityScorer::new(
        probe,
        Arc::new(HistoryStore::new(config.scoring.history_capacity)),
        config.domains.clone(),
        config.scoring.clone(),
    )
}

/// Run the relay until Ctrl-C, printing status events.
async fn run_relay(config: PilotConfig, group: String) -> Result<()> {
    let pilot = DnsPilot::new(config);
    let mut events = pilot.subscribe();

    let addr = pilot.start(&group).await?;
    println!("DNS relay listening on {addr}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {n} status events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    println!("\nStopping...");
    pilot.stop().await;

    let stats = pilot.stats();
    println!("\n=== Relay ===");
    println!("Queries: {}", stats.received);
    println!("Answered: {} (fallback {})", stats.forwarded + stats.fallback, stats.fallback);
    println!("Failed: {}", stats.failed);
    println!("Dropped: {}", stats.dropped);
    if stats.forwarded + stats.fallback > 0 {
        println!("Avg upstream: {:.2} ms", stats.avg_upstream_ms);
    }
    Ok(())
}

fn print_event(event: &StatusEvent) {
    match event {
        StatusEvent::Active {
            resolver,
            group,
            port,
        } => println!("[active] {resolver} (group {group}) on port {port}"),
        StatusEvent::Stopped => println!("[stopped]"),
        StatusEvent::Switched {
            resolver,
            group,
            timestamp,
            reason,
            peak_hour,
        } => println!(
            "[switched] {resolver} (group {group}) at {} reason={reason} peak={peak_hour}",
            timestamp.format("%H:%M:%S")
        ),
        StatusEvent::Status { text } => println!("[status] {text}"),
    }
}

/// Grade one resolver and print the result.
async fn run_check(config: &PilotConfig, resolver: IpAddr, quick: bool, format: OutputFormat) -> Result<()> {
    eprintln!("Checking {resolver}...\n");
    let result = scorer(config).check(resolver, quick).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => {
            print_results_table(std::slice::from_ref(&result));
            println!("\nUsable: {}", if result.usable { "yes" } else { "no" });
            println!("Health: {}", result.health());
        }
    }
    Ok(())
}

/// Grade all candidates and print the ranking inputs and the winner.
async fn run_select(config: &PilotConfig, peak: bool, format: OutputFormat) -> Result<()> {
    let candidates = config.candidates.for_mode(peak);
    eprintln!(
        "Selecting among {} candidates ({} mode)...\n",
        candidates.len(),
        if peak { "peak" } else { "normal" }
    );

    let selector = CandidateSelector::new(
        Arc::new(scorer(config)),
        config.candidates.default_resolver,
        config.scoring.max_parallel_checks,
    );
    let selection = selector
        .select(candidates, peak, config.scoring.selection_timeout(peak))
        .await;

    let winner = config.groups.candidate(selection.resolver);
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "resolver": winner.ip,
                "group": winner.group,
                "default": selection.is_default(),
                "timed_out": selection.timed_out,
                "results": selection.results,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            let mut results = selection.results.clone();
            results.sort_by(|a, b| b.score.cmp(&a.score));
            print_results_table(&results);
            if selection.timed_out {
                println!("\n(selection timed out, some candidates missing)");
            }
            println!(
                "\nBest: {winner}{}",
                if selection.is_default() { " [default]" } else { "" }
            );
        }
    }
    Ok(())
}

/// Print results in table format.
fn print_results_table(results: &[QualityResult]) {
    println!(
        "{:<4} {:<40} {:<6} {:<6} {:<10} {:<8} {:<8} {:<8}",
        "#", "Resolver", "Mode", "Score", "Status", "Latency", "Target", "Std"
    );
    println!("{}", "-".repeat(96));

    for (idx, r) in results.iter().enumerate() {
        let mode = match r.mode {
            dnspilot::dns::CheckMode::Full => "full",
            dnspilot::dns::CheckMode::Quick => "quick",
        };
        let usable = if r.usable { "" } else { "[unusable] " };
        println!(
            "{:<4} {:<40} {:<6} {:<6} {:<10} {:<8} {:<8} {:<8}",
            idx + 1,
            format!("{usable}{}", r.resolver),
            mode,
            r.score,
            r.status.to_string(),
            format!("{} ms", r.avg_latency_ms),
            format!("{}%", r.target_success_rate),
            format!("{}%", r.standard_success_rate),
        );
    }
}

fn run_peak(config: &PilotConfig, format: OutputFormat) -> Result<()> {
    let schedule = PeakSchedule::new(&config.peak);
    let now = schedule.now_local();
    let peak = schedule.is_peak_at(now);

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "local_time": now.format("%Y-%m-%d %H:%M").to_string(),
                "peak_hour": peak,
                "switch_threshold": config.control.threshold(peak),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            println!("Local time: {}", now.format("%a %Y-%m-%d %H:%M"));
            println!("Mode: {}", if peak { "PEAK" } else { "NORMAL" });
            println!("Switch threshold: {}", config.control.threshold(peak));
        }
    }
    Ok(())
}

/// Ping every IPv4 candidate.
async fn run_ping(config: &PilotConfig, count: usize, timeout: u64, format: OutputFormat) -> Result<()> {
    let tester = ReachabilityTester::with_settings(Duration::from_secs(timeout), count)?;
    let resolvers: Vec<IpAddr> = config
        .candidates
        .normal
        .iter()
        .copied()
        .filter(IpAddr::is_ipv4)
        .collect();

    eprintln!("Pinging {} resolvers...\n", resolvers.len());
    let mut results = tester.ping_all(&resolvers).await;
    results.sort_by(|a, b| {
        let a_lat = a.latency_ms.unwrap_or(f64::MAX);
        let b_lat = b.latency_ms.unwrap_or(f64::MAX);
        a_lat.partial_cmp(&b_lat).unwrap_or(std::cmp::Ordering::Equal)
    });

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table => print_ping_table(&results),
    }
    Ok(())
}

fn print_ping_table(results: &[PingResult]) {
    println!("{:<4} {:<18} {:<12} {:<8}", "#", "Resolver", "RTT", "Loss");
    println!("{}", "-".repeat(44));

    for (idx, r) in results.iter().enumerate() {
        let latency = r
            .latency_ms
            .map(|l| format!("{:.1} ms", l))
            .unwrap_or_else(|| "Timeout".to_string());
        println!(
            "{:<4} {:<18} {:<12} {:<8}",
            idx + 1,
            r.resolver,
            latency,
            format!("{:.0}%", r.packet_loss * 100.0)
        );
    }
}

fn run_export(config: &PilotConfig, output: &Path) -> Result<()> {
    ConfigLoader::save_to_file(config, output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

/// Main entry point for the dnspilot CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let (cli, verbose) = dnspilot::cli::parse_verbose();
    setup_logging(verbose, cli.quiet);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "dnspilot", &mut std::io::stdout());
        return Ok(());
    }

    let config = ConfigLoader::load(cli.config.as_deref())?;
    tracing::debug!("dnspilot starting...");

    match cli.command {
        Commands::Run { group } => run_relay(config, group).await?,
        Commands::Check { resolver, quick } => run_check(&config, resolver, quick, cli.format).await?,
        Commands::Select { peak } => run_select(&config, peak, cli.format).await?,
        Commands::Peak => run_peak(&config, cli.format)?,
        Commands::Ping { count, timeout } => run_ping(&config, count, timeout, cli.format).await?,
        Commands::Config { output } => run_export(&config, &output)?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
