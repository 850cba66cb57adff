//! Listing-Harvest main entry point
//!
//! This is the command-line interface for the Listing-Harvest crawl-and-ingest
//! pipeline.

use anyhow::{bail, Context};
use clap::Parser;
use listing_harvest::config::{load_config_with_hash, Config, FetcherKind};
use listing_harvest::crawler::{CrawlOrchestrator, CrawlWorker, QueueManager};
use listing_harvest::ingest::{build_notifier, import_catalog_csv, CatalogMerger};
use listing_harvest::output::{export_staging, load_statistics, print_statistics, ExportFormat};
use listing_harvest::robots::RobotsPolicyCache;
use listing_harvest::storage::{open_storage, SessionTrigger, SqliteStorage};
use listing_harvest::url::parse_crawl_url;
use listing_harvest::SessionSummary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Listing-Harvest: a polite product-listing crawler
///
/// Listing-Harvest crawls the listing pages of a catalog site while
/// respecting robots.txt, stages every product card it finds and merges
/// them into a canonical catalog with inventory.
#[derive(Parser, Debug)]
#[command(name = "listing-harvest")]
#[command(version)]
#[command(about = "A polite product-listing crawler", long_about = None)]
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

    /// Listing URL to start crawling from
    #[arg(long, value_name = "URL")]
    seed: Option<String>,

    /// Maximum number of listing pages to process per session
    #[arg(long, value_name = "N")]
    limit: Option<u32>,

    /// Keep running and crawl the seed every schedule interval
    #[arg(long, requires = "seed", conflicts_with_all = ["dry_run", "stats", "export"])]
    schedule: bool,

    /// Export staging records (csv or json) and exit
    #[arg(long, value_name = "FORMAT", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<String>,

    /// Export destination (defaults to staging.<format>)
    #[arg(long, value_name = "PATH", requires = "export")]
    output: Option<PathBuf>,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Load products from a CSV file straight into the catalog and exit
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with_all = ["dry_run", "stats", "export", "seed"]
    )]
    import_csv: Option<PathBuf>,

    /// Return failed queue entries to pending before anything else
    #[arg(long)]
    reset_failed: bool,

    /// Return in-progress entries left by an interrupted run to pending
    #[arg(long)]
    requeue_stale: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        return handle_dry_run(&config, cli.seed.as_deref(), cli.limit);
    }

    let mut storage = open_storage(Path::new(&config.storage.database_path))
        .with_context(|| format!("Failed to open database {}", config.storage.database_path))?;

    if cli.requeue_stale {
        let count = QueueManager::new(&mut storage).requeue_stale()?;
        println!("✓ Requeued {} in-progress entries", count);
    }
    if cli.reset_failed {
        let count = QueueManager::new(&mut storage).reset_failed()?;
        println!("✓ Reset {} failed entries to pending", count);
    }

    if cli.stats {
        return handle_stats(&storage, &config);
    }
    if let Some(format) = cli.export.as_deref() {
        return handle_export(&storage, format, cli.output.as_deref());
    }
    if let Some(path) = cli.import_csv.as_deref() {
        return handle_import(&mut storage, &config, path);
    }

    let Some(seed) = cli.seed.as_deref() else {
        if cli.reset_failed || cli.requeue_stale {
            return Ok(());
        }
        bail!("--seed is required to crawl");
    };

    let orchestrator = build_orchestrator(storage, config.clone(), config_hash)?;
    if cli.schedule {
        let orchestrator = orchestrator.with_config_reload(cli.config.clone());
        handle_schedule(orchestrator, &config, seed, cli.limit).await
    } else {
        handle_crawl(orchestrator, &config, seed, cli.limit).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvest=info,warn"),
            1 => EnvFilter::new("listing_harvest=debug,info"),
            2 => EnvFilter::new("listing_harvest=trace,debug"),
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

fn build_orchestrator(
    storage: SqliteStorage,
    config: Config,
    config_hash: String,
) -> anyhow::Result<CrawlOrchestrator<SqliteStorage>> {
    let robots = RobotsPolicyCache::new(&config.robots, &config.crawler.user_agent)
        .context("Failed to build robots.txt client")?;
    let notifier =
        build_notifier(&config.notification).context("Failed to build notification client")?;

    Ok(CrawlOrchestrator::new(
        storage,
        Arc::new(config),
        config_hash,
        Arc::new(robots),
        notifier,
    ))
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, seed: Option<&str>, limit: Option<u32>) -> anyhow::Result<()> {
    println!("=== Listing-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!(
        "  Fetcher: {}",
        match config.crawler.fetcher {
            FetcherKind::Browser => "headless browser",
            FetcherKind::Http => "plain HTTP",
        }
    );
    println!("  Politeness delay: {}ms", config.crawler.politeness_delay_ms);
    println!("  Render timeout: {}s", config.crawler.render_timeout_secs);
    println!("  Content marker: {}", config.crawler.content_marker);
    println!("  Default limit: {}", config.crawler.default_limit);
    println!(
        "  Schedule interval: {}s",
        config.crawler.schedule_interval_secs
    );

    println!("\nRobots Cache:");
    match config.robots.ttl() {
        Some(ttl) => println!("  TTL: {}s", ttl.as_secs()),
        None => println!("  TTL: process lifetime"),
    }
    println!("  Max hosts: {}", config.robots.max_hosts);

    println!("\nStock range: {}..={}", config.stock.min, config.stock.max);
    println!("Database: {}", config.storage.database_path);

    println!("\nNotification:");
    if config.notification.enabled {
        println!("  Endpoint: {}", config.notification.endpoint);
        println!("  Timeout: {}s", config.notification.timeout_secs);
    } else {
        println!("  Disabled");
    }

    println!("\n✓ Configuration is valid");
    if let Some(seed) = seed {
        let seed = parse_crawl_url(seed).context("Invalid seed URL")?;
        println!(
            "✓ Would crawl up to {} pages starting at {}",
            limit.unwrap_or(config.crawler.default_limit),
            seed
        );
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(storage: &SqliteStorage, config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let stats = load_statistics(storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: dumps the staging table
fn handle_export(storage: &SqliteStorage, format: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let Some(format) = ExportFormat::from_name(format) else {
        bail!("Unknown export format '{}' (expected csv or json)", format);
    };
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("staging.{}", format.extension())));

    let count = export_staging(storage, format, &path)?;
    if count == 0 {
        println!("No records to export");
    } else {
        println!("✓ Exported {} records to: {}", count, path.display());
    }

    Ok(())
}

/// Handles the --import-csv mode: loads a product file into the catalog
fn handle_import(
    storage: &mut SqliteStorage,
    config: &Config,
    path: &Path,
) -> anyhow::Result<()> {
    let mut merger = CatalogMerger::new(config.stock);
    let summary = import_catalog_csv(storage, &mut merger, path)
        .with_context(|| format!("Failed to import {}", path.display()))?;

    println!(
        "✓ Imported {} products from {} ({} rows skipped)",
        summary.imported,
        path.display(),
        summary.skipped
    );

    Ok(())
}

/// Handles a single crawl session
async fn handle_crawl(
    mut orchestrator: CrawlOrchestrator<SqliteStorage>,
    config: &Config,
    seed: &str,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let seed = parse_crawl_url(seed).context("Invalid seed URL")?;
    let limit = limit.unwrap_or(config.crawler.default_limit);
    if limit == 0 {
        bail!("--limit must be at least 1");
    }

    let summary = orchestrator.run(&seed, limit, SessionTrigger::Cli).await;
    print_summary(&summary);

    match summary.error {
        Some(error) => bail!("Crawl session failed: {}", error),
        None => Ok(()),
    }
}

/// Handles the --schedule mode: crawls every interval until interrupted
async fn handle_schedule(
    orchestrator: CrawlOrchestrator<SqliteStorage>,
    config: &Config,
    seed: &str,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let mut handle = CrawlWorker::spawn(orchestrator, config.crawler.default_limit);
    let mut reports = handle.subscribe();
    handle.schedule_every(config.crawler.schedule_interval(), seed, limit)?;

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Ok(summary) => print_summary(&summary),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} session reports", missed);
                }
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested; waiting for the current session");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!("=== Crawl Session ===");
    if let Some(id) = summary.session_id {
        println!("  Session: #{}", id);
    }
    println!("  Seed: {}", summary.seed_url);
    println!("  Status: {}", summary.status.to_db_string());
    println!("  URLs processed: {}", summary.urls_processed);
    println!("  URLs failed: {}", summary.urls_failed);
    println!("  Products ingested: {}", summary.products_ingested);
    println!("  Notification: {:?}", summary.notification);
    if let Some(error) = &summary.error {
        println!("  Error: {}", error);
    }
}
