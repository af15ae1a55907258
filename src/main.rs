//! Directory-Harvest main entry point
//!
//! This is the command-line interface for the directory harvester.

use anyhow::Context;
use clap::{Parser, Subcommand};
use directory_harvest::config::{load_config_with_hash, Config};
use directory_harvest::crawler::{load_categories, Coordinator, CrawlOptions};
use directory_harvest::details::{DetailOptions, DetailPipeline};
use directory_harvest::output::RunOutcome;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Directory-Harvest: resumable crawler for paginated directory sites
///
/// Directory-Harvest scouts every category of a directory site, bulk-fetches
/// listing pages over plain HTTP, retries blocked pages through headless
/// browser instances, and downloads one detail document per record.
#[derive(Parser, Debug)]
#[command(name = "directory-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Resumable crawler for paginated directory sites", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl listing pages for the categories in a discovery file
    Crawl {
        /// JSON file of the form {"categories": ["slug", ...]}
        #[arg(value_name = "CATEGORIES_JSON")]
        categories: PathBuf,

        /// Delete checkpoints and previous listings before starting
        #[arg(long)]
        force: bool,
    },

    /// Download the detail document of every merged record
    FetchDetails {
        /// Re-download documents that already exist
        #[arg(long, conflicts_with = "retry_blocked")]
        force: bool,

        /// Re-download only documents that hold a bot challenge
        #[arg(long)]
        retry_blocked: bool,
    },

    /// Show what the data directory holds
    Status {
        /// Also write a markdown report to this path
        #[arg(long, value_name = "PATH")]
        export: Option<PathBuf>,
    },

    /// Validate config and show what would run, without fetching
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl { categories, force } => {
            handle_crawl(&config, &categories, force, !cli.quiet).await
        }
        Command::FetchDetails {
            force,
            retry_blocked,
        } => handle_fetch_details(&config, force, retry_blocked, !cli.quiet).await,
        Command::Status { export } => handle_status(&config, export),
        Command::Check => handle_check(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("directory_harvest=info,warn"),
            1 => EnvFilter::new("directory_harvest=debug,info"),
            2 => EnvFilter::new("directory_harvest=trace,debug"),
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

/// Handles `crawl`: listing pages into `listings.json`
async fn handle_crawl(
    config: &Config,
    categories_path: &std::path::Path,
    force: bool,
    show_progress: bool,
) -> anyhow::Result<()> {
    let categories = load_categories(categories_path)?;
    tracing::info!(
        "{} categories from {}",
        categories.len(),
        categories_path.display()
    );

    let coordinator = Coordinator::new(config)
        .context("Failed to set up fetch channels")?
        .with_progress(show_progress);

    // Ctrl-C stops scheduling new pages; finished categories stay checkpointed
    let state = coordinator.state();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            state.request_stop();
        }
    });

    let summary = coordinator
        .run(&categories, CrawlOptions { force })
        .await
        .context("Crawl failed")?;

    match summary.outcome {
        RunOutcome::Interrupted => {
            tracing::warn!("Run again with the same arguments to resume");
        }
        RunOutcome::Partial => {
            tracing::warn!(
                "{} records in {}; run again to retry {} unplanned categories",
                summary.merged_records,
                coordinator.layout().listings_path().display(),
                summary.planning_failures.len()
            );
        }
        RunOutcome::Completed | RunOutcome::AlreadyComplete => {
            tracing::info!(
                "{} records in {}",
                summary.merged_records,
                coordinator.layout().listings_path().display()
            );
        }
    }

    Ok(())
}

/// Handles `fetch-details`: one document per merged record
async fn handle_fetch_details(
    config: &Config,
    force: bool,
    retry_blocked: bool,
    show_progress: bool,
) -> anyhow::Result<()> {
    let options = DetailOptions {
        force,
        retry_blocked,
    };
    let pipeline = DetailPipeline::new(config)
        .context("Failed to set up fetch channels")?
        .with_progress(show_progress);
    let summary = pipeline
        .run(options)
        .await
        .context("Detail fetch failed")?;

    if summary.failed > 0 {
        tracing::warn!(
            "{} records failed; run `fetch-details --retry-blocked` or again later",
            summary.failed
        );
    }
    Ok(())
}

/// Handles `status`: statistics from the data directory
fn handle_status(config: &Config, export: Option<PathBuf>) -> anyhow::Result<()> {
    use directory_harvest::output::{generate_markdown_report, load_statistics, print_statistics};
    use directory_harvest::storage::DataLayout;

    let layout = DataLayout::new(&config.output.data_dir);
    let stats = load_statistics(&layout).context("Failed to read data directory")?;
    print_statistics(&stats);

    if let Some(path) = export {
        generate_markdown_report(&stats, &path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("\n✓ Report exported to: {}", path.display());
    }

    Ok(())
}

/// Handles `check`: validates config and shows what would run
fn handle_check(config: &Config) -> anyhow::Result<()> {
    println!("=== Directory-Harvest Check ===\n");

    println!("Site:");
    println!("  Listing URL: {}", config.site.listing_url);
    println!("  Referer: {}", config.site.referer);
    println!("  Detail path marker: {}", config.site.detail_path_marker);

    println!("\nLight channel:");
    println!("  Max concurrent: {}", config.light.max_concurrent);
    println!(
        "  Delay: {}-{}ms",
        config.light.delay_min_ms, config.light.delay_max_ms
    );
    println!(
        "  Proxy: {}",
        config.light.proxy.as_deref().unwrap_or("(none)")
    );

    println!("\nBrowser pool ({} instances):", config.browser.endpoints.len());
    for endpoint in &config.browser.endpoints {
        println!("  - {}", endpoint);
    }
    println!("  Tabs per instance: {}", config.browser.tabs);
    println!("  Total concurrency: {}", config.browser.total_concurrency());

    println!("\nCrawl:");
    println!("  Skip threshold: {:.2}", config.crawl.pa_skip_threshold);
    println!("  Dedup threshold: {:.2}", config.crawl.dedup_threshold);
    match config.crawl.max_results {
        Some(cap) => println!("  Max results: {}", cap),
        None => println!("  Max results: (unlimited)"),
    }
    println!(
        "  Max pages per category: {}",
        config.crawl.max_pages_per_category
    );

    println!("\nOutput:");
    println!("  Data directory: {}", config.output.data_dir);

    // Building the channels catches bad proxies and viewports
    Coordinator::new(config).context("Failed to set up fetch channels")?;

    println!("\n✓ Configuration is valid");
    Ok(())
}
