//! Markdown report generation
//!
//! This module renders the status of a data directory, including the last
//! crawl summary, as a human-readable markdown report.

use crate::output::DataStatistics;
use crate::storage::{write_atomic, StorageResult};
use std::path::Path;

/// Generates a markdown report and writes it to `output_path`
///
/// # Arguments
///
/// * `stats` - Statistics loaded from the data directory
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(StorageError)` - Failed to write the report
pub fn generate_markdown_report(stats: &DataStatistics, output_path: &Path) -> StorageResult<()> {
    let markdown = format_markdown_report(stats);
    write_atomic(output_path, markdown.as_bytes())
}

/// Formats data directory statistics as markdown
pub fn format_markdown_report(stats: &DataStatistics) -> String {
    let mut md = String::new();

    md.push_str("# Directory Harvest Report\n\n");
    md.push_str(&format!(
        "- **Data Directory**: {}\n\n",
        stats.data_dir.display()
    ));

    md.push_str("## Listings\n\n");
    match stats.listings {
        Some(count) => md.push_str(&format!("- **Merged Records**: {}\n", count)),
        None => md.push_str("- **Merged Records**: not merged yet\n"),
    }
    md.push_str(&format!(
        "- **Pending Checkpoints**: {}\n\n",
        stats.pending_checkpoints.len()
    ));
    if !stats.pending_checkpoints.is_empty() {
        for category in &stats.pending_checkpoints {
            md.push_str(&format!("- `{}`\n", category));
        }
        md.push('\n');
    }

    md.push_str("## Details\n\n");
    md.push_str(&format!("- **Documents**: {}\n", stats.documents));
    if let Some(counts) = &stats.detail_status {
        md.push_str("\n| Status | Count |\n");
        md.push_str("|--------|-------|\n");
        md.push_str(&format!("| success | {} |\n", counts.success));
        md.push_str(&format!("| failed | {} |\n", counts.failed));
        md.push_str(&format!("| skipped | {} |\n", counts.skipped));
    }
    md.push('\n');

    if let Some(summary) = &stats.last_crawl {
        md.push_str("## Last Crawl\n\n");
        md.push_str(&format!("- **Started**: {}\n", summary.started_at));
        if let Some(finished) = &summary.finished_at {
            md.push_str(&format!("- **Finished**: {}\n", finished));
        }
        if let Some(duration) = summary.duration_seconds {
            md.push_str(&format!(
                "- **Duration**: {} seconds ({:.2} minutes)\n",
                duration,
                duration as f64 / 60.0
            ));
        }
        md.push_str(&format!("- **Outcome**: {}\n\n", summary.outcome));

        md.push_str("### Pages\n\n");
        md.push_str("| Phase | Pages |\n");
        md.push_str("|-------|-------|\n");
        md.push_str(&format!("| scout | {} |\n", summary.scout_pages));
        md.push_str(&format!("| bulk | {} |\n", summary.bulk_pages));
        md.push_str(&format!("| fallback | {} |\n\n", summary.fallback_pages));
        md.push_str(&format!(
            "- **Escalated**: {}\n- **Failed**: {}\n\n",
            summary.pages_escalated, summary.pages_failed
        ));

        md.push_str("### Categories\n\n");
        md.push_str(&format!(
            "- **Total**: {} ({} resumed from checkpoints)\n",
            summary.categories_total, summary.categories_resumed
        ));
        for (label, list) in [
            ("Skipped", &summary.categories_skipped),
            ("Stopped Early", &summary.categories_stopped_early),
            ("Planning Failures", &summary.planning_failures),
        ] {
            if list.is_empty() {
                continue;
            }
            md.push_str(&format!("- **{}**: {}\n", label, list.join(", ")));
        }
        md.push('\n');
    }

    md.push_str("---\n\n");
    md.push_str("*Generated by directory-harvest*\n");

    md
}
