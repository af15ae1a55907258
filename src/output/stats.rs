//! Statistics about a data directory
//!
//! This module backs the `status` command: it inspects the artifacts of a
//! crawl and detail run on disk and prints a short overview.

use crate::details::{read_status_counts, StatusCounts};
use crate::output::CrawlSummary;
use crate::storage::{read_json, DataLayout, RecordMap};
use std::path::PathBuf;

/// What a data directory currently holds
#[derive(Debug, Clone)]
pub struct DataStatistics {
    pub data_dir: PathBuf,

    /// Records in `listings.json`, None when the crawl has not been merged
    pub listings: Option<usize>,

    /// Categories with a checkpoint awaiting merge
    pub pending_checkpoints: Vec<String>,

    /// Records held across pending checkpoints (before dedup)
    pub checkpointed_records: usize,

    /// Detail documents on disk
    pub documents: usize,

    /// Counts from `fetch_status.json`, None when the pipeline never ran
    pub detail_status: Option<StatusCounts>,

    /// Summary of the most recent crawl run
    pub last_crawl: Option<CrawlSummary>,
}

/// Loads statistics from a data directory
///
/// # Arguments
///
/// * `layout` - The data directory to inspect
///
/// # Returns
///
/// * `Ok(DataStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - An artifact exists but cannot be read
pub fn load_statistics(layout: &DataLayout) -> crate::Result<DataStatistics> {
    let listings_path = layout.listings_path();
    let listings = if listings_path.exists() {
        let records: RecordMap = read_json(&listings_path)?;
        Some(records.len())
    } else {
        None
    };

    let checkpoints = layout.checkpoints().load_all()?;
    let checkpointed_records = checkpoints
        .values()
        .map(|checkpoint| checkpoint.records.len())
        .sum();
    let pending_checkpoints = checkpoints.into_keys().collect();

    let documents = count_documents(layout)?;
    let detail_status = read_status_counts(&layout.fetch_status_path())?;

    // Diagnostic only, a bad summary file should not hide the rest
    let summary_path = layout.crawl_summary_path();
    let last_crawl = if summary_path.exists() {
        match read_json::<CrawlSummary>(&summary_path) {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("Ignoring unreadable crawl summary: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(DataStatistics {
        data_dir: layout.root().to_path_buf(),
        listings,
        pending_checkpoints,
        checkpointed_records,
        documents,
        detail_status,
        last_crawl,
    })
}

fn count_documents(layout: &DataLayout) -> crate::Result<usize> {
    let entries = match std::fs::read_dir(layout.docs_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "doc") {
            count += 1;
        }
    }
    Ok(count)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &DataStatistics) {
    println!("=== Data Directory Status ===\n");
    println!("Directory: {}\n", stats.data_dir.display());

    println!("Listings:");
    match stats.listings {
        Some(count) => println!("  Merged records: {}", count),
        None => println!("  Merged records: (not merged yet)"),
    }
    if !stats.pending_checkpoints.is_empty() {
        println!(
            "  Pending checkpoints: {} ({} records)",
            stats.pending_checkpoints.len(),
            stats.checkpointed_records
        );
        for category in &stats.pending_checkpoints {
            println!("    - {}", category);
        }
    }
    println!();

    println!("Details:");
    println!("  Documents on disk: {}", stats.documents);
    if let Some(counts) = &stats.detail_status {
        let total = counts.total();
        for (label, count) in [
            ("Success", counts.success),
            ("Failed", counts.failed),
            ("Skipped", counts.skipped),
        ] {
            let percentage = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", label, count, percentage);
        }
    }
    if let Some(listings) = stats.listings {
        if listings > 0 {
            println!(
                "  Coverage: {:.1}% ({} / {} records)",
                (stats.documents as f64 / listings as f64) * 100.0,
                stats.documents,
                listings
            );
        }
    }
    println!();

    if let Some(summary) = &stats.last_crawl {
        println!("Last Crawl:");
        println!("  Started: {}", summary.started_at);
        println!("  Outcome: {}", summary.outcome);
        println!(
            "  Categories: {} planned, {} skipped, {} stopped early, {} failed",
            summary.categories_planned,
            summary.categories_skipped.len(),
            summary.categories_stopped_early.len(),
            summary.planning_failures.len()
        );
        println!(
            "  Pages: {} ({} escalated, {} failed)",
            summary.total_pages(),
            summary.pages_escalated,
            summary.pages_failed
        );
    }
}
