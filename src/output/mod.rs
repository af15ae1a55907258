//! Output module for run summaries and reports
//!
//! This module handles:
//! - The per-run crawl summary written to `crawl_summary.json`
//! - Statistics about a data directory for the `status` command
//! - A markdown report combining both
//! - Live progress bars for the crawl and detail runs

mod markdown;
mod progress;
pub mod stats;
mod summary;

pub use markdown::{format_markdown_report, generate_markdown_report};
pub use progress::progress_bar;
pub use stats::{load_statistics, print_statistics, DataStatistics};
pub use summary::{CrawlSummary, RunOutcome};
