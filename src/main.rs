//! web-archive main entry point
//!
//! This is the command-line interface for the offline website archiver.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use web_archive::config::{load_config_with_hash, validate, AssessmentStrategy, Config};
use web_archive::output::{print_statistics, result_json, CrawlResult};
use web_archive::Coordinator;

/// web-archive: an offline website archiver
///
/// Crawls a site breadth-first from a seed URL, stores every page and
/// asset with references rewritten for offline browsing, and reports
/// whether the copy is complete.
#[derive(Parser, Debug)]
#[command(name = "web-archive")]
#[command(version)]
#[command(about = "An offline website archiver", long_about = None)]
struct Cli {
    /// Seed URL to archive (overrides the configuration file)
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the archive is written under
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Maximum link distance from the seed
    #[arg(long)]
    max_depth: Option<u32>,

    /// Maximum number of pages to archive
    #[arg(long)]
    max_pages: Option<usize>,

    /// Maximum number of concurrent fetches
    #[arg(long)]
    concurrency: Option<usize>,

    /// Stop the run after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Follow links to other hosts
    #[arg(long)]
    allow_offsite: bool,

    /// Assess completeness with the judgment service at this URL
    #[arg(long, value_name = "URL")]
    judgment_endpoint: Option<String>,

    /// Print the crawl result as JSON
    #[arg(long)]
    json: bool,

    /// Validate config and show what would be archived without fetching anything
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = load(&cli)?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let mut coordinator = Coordinator::new(config)?;
    if let Some(hash) = config_hash {
        coordinator = coordinator.with_config_hash(hash);
    }

    let result = coordinator.run().await.context("Archive run failed")?;

    if cli.json {
        println!("{}", result_json(&result)?);
    } else if !cli.quiet {
        print_summary(&result);
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("web_archive=info,warn"),
            1 => EnvFilter::new("web_archive=debug,info"),
            2 => EnvFilter::new("web_archive=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the run configuration from the config file and command-line overrides
fn load(cli: &Cli) -> anyhow::Result<(Config, Option<String>)> {
    let (mut config, hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, Some(hash))
        }
        None => {
            let Some(url) = &cli.url else {
                bail!("a seed URL is required (as an argument or in the configuration file)");
            };
            (Config::for_seed(url.as_str()), None)
        }
    };

    if let Some(url) = &cli.url {
        config.crawler.seed_url = url.clone();
    }
    if let Some(output) = &cli.output {
        config.output.archive_root = output.clone();
    }
    if let Some(depth) = cli.max_depth {
        config.crawler.max_depth = depth;
    }
    if let Some(pages) = cli.max_pages {
        config.crawler.max_pages = pages;
    }
    if let Some(concurrency) = cli.concurrency {
        config.crawler.max_concurrent_fetches = concurrency;
    }
    if let Some(deadline) = cli.deadline_secs {
        config.crawler.run_deadline_secs = Some(deadline);
    }
    if cli.allow_offsite {
        config.crawler.same_origin_only = false;
    }
    if let Some(endpoint) = &cli.judgment_endpoint {
        config.assessment.strategy = AssessmentStrategy::Judgment;
        config.assessment.judgment_endpoint = Some(endpoint.clone());
    }

    validate(&config).context("Invalid configuration")?;
    Ok((config, hash))
}

/// Handles the --dry-run mode: shows what would be archived
fn handle_dry_run(config: &Config) {
    let crawl = &config.crawler;
    println!("=== web-archive Dry Run ===\n");

    println!("Seed: {}", crawl.seed_url);
    println!("\nCrawler Configuration:");
    println!("  Max depth: {}", crawl.max_depth);
    println!("  Max pages: {}", crawl.max_pages);
    println!("  Concurrent fetches: {}", crawl.max_concurrent_fetches);
    println!("  Per-host interval: {}ms", crawl.per_host_interval_ms);
    println!("  Same origin only: {}", crawl.same_origin_only);
    println!("  Request timeout: {}ms", crawl.request_timeout_ms);
    println!("  Retries: {} (backoff {}ms)", crawl.retry_count, crawl.retry_backoff_ms);
    println!("  Max redirects: {}", crawl.max_redirects);
    println!("  Max resource size: {} bytes", crawl.max_resource_bytes);
    match crawl.run_deadline_secs {
        Some(secs) => println!("  Run deadline: {}s", secs),
        None => println!("  Run deadline: none"),
    }
    println!("  User agent: {}", crawl.user_agent);

    println!("\nOutput:");
    println!("  Archive root: {}", config.output.archive_root.display());

    println!("\nAssessment:");
    match config.assessment.strategy {
        AssessmentStrategy::Structural => println!("  Strategy: structural"),
        AssessmentStrategy::Judgment => {
            println!("  Strategy: judgment");
            if let Some(endpoint) = &config.assessment.judgment_endpoint {
                println!("  Endpoint: {}", endpoint);
            }
            println!("  Timeout: {}ms", config.assessment.judgment_timeout_ms);
        }
    }

    println!("\n✓ Configuration is valid");
}

fn print_summary(result: &CrawlResult) {
    print_statistics(&result.stats);

    println!("Archive: {}", result.archive_path.display());
    println!("Manifest: {}", result.manifest_path.display());
    println!("Status: {:?} ({:?})", result.status, result.termination);

    if !result.broken_links.is_empty() {
        println!("\nBroken links:");
        for link in &result.broken_links {
            println!("  - {} ({})", link.url, link.reason);
        }
    }
    if !result.not_attempted.is_empty() {
        println!("\nNot attempted: {}", result.not_attempted.len());
    }

    let mark = if result.completeness.is_complete { "✓" } else { "✗" };
    println!("\n{} {}", mark, result.completeness.report);
}
