//! Sitegauge main entry point
//!
//! This is the command-line interface around the sitegauge crawl core.

use anyhow::Context;
use clap::Parser;
use sitegauge::analyzer::{PageReport, Severity};
use sitegauge::config::{load_config_with_hash, Config};
use sitegauge::output::print_summary;
use sitegauge::storage::open_storage;
use sitegauge::{extract_domain, normalize_url, Coordinator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

/// Sitegauge: crawl one site and measure every HTTP exchange
///
/// Sitegauge crawls a single domain under bounded concurrency and records
/// timing, redirects, security headers, compression, caching and detected
/// technologies for each page.
#[derive(Parser, Debug)]
#[command(name = "sitegauge")]
#[command(version)]
#[command(about = "Single-domain crawler with per-page transport telemetry", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, ignoring previous state
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "status")]
    dry_run: bool,

    /// Show the last recorded run for the configured site and exit
    #[arg(long, conflicts_with = "dry_run")]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.fresh {
        config.storage.resume = false;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.status {
        handle_status(&config)?;
    } else {
        handle_crawl(&config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sitegauge=info,warn"),
            1 => EnvFilter::new("sitegauge=debug,info"),
            2 => EnvFilter::new("sitegauge=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: shows the effective settings
fn handle_dry_run(config: &Config) {
    let crawl = &config.crawl;

    println!("=== Sitegauge Dry Run ===\n");

    println!("Site:");
    println!("  Root URL: {}", config.site.root_url);

    println!("\nCrawl:");
    println!("  Workers: {}", crawl.max_parallel_crawl);
    println!("  Crawl delay: {}ms", crawl.crawl_delay);
    println!("  Request timeout: {}ms", crawl.request_timeout);
    println!(
        "  Retries: {} (backoff {}ms)",
        crawl.max_retries, crawl.retry_backoff
    );
    println!("  Max redirects: {}", crawl.max_redirects);
    println!("  External probes: {}", crawl.max_external_links);
    println!("  User agent: {}", crawl.user_agent);
    if let Some(max_pages) = crawl.max_pages {
        println!("  Max pages: {}", max_pages);
    }
    if let Some(max_depth) = crawl.max_depth {
        println!("  Max depth: {}", max_depth);
    }
    if let Some(interval) = crawl.checkpoint_interval {
        println!("  Checkpoint every: {}s", interval);
    }

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Resume: {}", config.storage.resume);

    println!("\nConfiguration is valid. Use without --dry-run to start crawling.");
}

/// Handles --status: prints the last run recorded for the site
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let root = normalize_url(&config.site.root_url)?;
    let domain = extract_domain(&root).context("root URL has no host")?;
    let storage = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open database")?;

    match storage.latest_run(&domain)? {
        Some(run) => {
            println!("=== Last Run for {} ===\n", domain);
            println!("  Run: #{}", run.id);
            println!("  Status: {}", run.status.to_db_string());
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!("  Config hash: {}", run.config_hash);
        }
        None => println!("No runs recorded for {}", domain),
    }

    Ok(())
}

/// Runs the crawl, cancelling it on Ctrl-C
async fn handle_crawl(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut coordinator = Coordinator::from_config(config, config_hash)
        .context("failed to set up crawl")?
        .with_report_sink(tx);

    let abort = coordinator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight pages");
            abort.cancel();
        }
    });

    let reporter = tokio::spawn(collect_findings(rx));

    let summary = coordinator.run().await.context("crawl failed")?;
    let findings = reporter.await.unwrap_or_default();

    print_summary(&summary);
    if !findings.is_empty() {
        println!("\nFindings:");
        for (severity, count) in findings.iter().rev() {
            println!("  {:?}: {}", severity, count);
        }
    }

    Ok(())
}

/// Drains page reports until the crawl drops its sender
async fn collect_findings(mut reports: UnboundedReceiver<PageReport>) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();

    while let Some(report) = reports.recv().await {
        for finding in &report.findings {
            if finding.severity == Severity::Critical {
                tracing::warn!("{}: {}", report.page.url, finding.message);
            }
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
    }

    counts
}
