use crate::state::CategoryPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a crawl run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// All categories resolved and merged into `listings.json`
    Completed,

    /// `listings.json` already existed and no checkpoint was pending
    AlreadyComplete,

    /// Stopped before the end; checkpoints kept, nothing merged
    Interrupted,

    /// Merged, but some categories could not be planned; checkpoints kept
    /// so the next run retries only those
    Partial,
}

impl RunOutcome {
    /// True when a later run has nothing left to fetch
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyComplete)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::AlreadyComplete => "already complete",
            Self::Interrupted => "interrupted",
            Self::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// Summary statistics for one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    // Run metadata
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,

    // Categories
    pub categories_total: usize,
    pub categories_resumed: usize,
    pub categories_planned: usize,
    pub categories_skipped: Vec<String>,
    pub categories_stopped_early: Vec<String>,
    pub planning_failures: Vec<String>,

    // Pages
    pub scout_pages: usize,
    pub bulk_pages: usize,
    pub fallback_pages: usize,
    pub pages_escalated: usize,
    pub pages_failed: usize,

    // Records
    pub unique_identifiers: usize,
    pub merged_records: usize,
}

impl CrawlSummary {
    /// Starts a summary for a run over `categories_total` categories
    pub fn new(categories_total: usize) -> Self {
        Self {
            outcome: RunOutcome::Interrupted,
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: None,
            categories_total,
            categories_resumed: 0,
            categories_planned: 0,
            categories_skipped: Vec::new(),
            categories_stopped_early: Vec::new(),
            planning_failures: Vec::new(),
            scout_pages: 0,
            bulk_pages: 0,
            fallback_pages: 0,
            pages_escalated: 0,
            pages_failed: 0,
            unique_identifiers: 0,
            merged_records: 0,
        }
    }

    /// Copies per-category decisions from the final plans
    pub fn record_plans<'a>(&mut self, plans: impl IntoIterator<Item = &'a CategoryPlan>) {
        for plan in plans {
            if plan.planning_failed {
                self.planning_failures.push(plan.slug.clone());
                continue;
            }
            self.categories_planned += 1;
            if plan.skip {
                self.categories_skipped.push(plan.slug.clone());
            }
            if plan.stopped_early {
                self.categories_stopped_early.push(plan.slug.clone());
            }
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        let finished_at = Utc::now();
        self.outcome = outcome;
        self.duration_seconds = Some((finished_at - self.started_at).num_seconds());
        self.finished_at = Some(finished_at);
    }

    pub fn total_pages(&self) -> usize {
        self.scout_pages + self.bulk_pages + self.fallback_pages
    }

    /// Logs the summary at info level
    pub fn log(&self) {
        tracing::info!("Crawl {}", self.outcome);
        tracing::info!(
            "Categories: {} total, {} resumed, {} planned, {} skipped, {} stopped early, {} failed",
            self.categories_total,
            self.categories_resumed,
            self.categories_planned,
            self.categories_skipped.len(),
            self.categories_stopped_early.len(),
            self.planning_failures.len()
        );
        tracing::info!(
            "Pages: {} scout, {} bulk, {} fallback ({} escalated, {} failed)",
            self.scout_pages,
            self.bulk_pages,
            self.fallback_pages,
            self.pages_escalated,
            self.pages_failed
        );
        tracing::info!(
            "Identifiers: {} unique, {} merged",
            self.unique_identifiers,
            self.merged_records
        );
    }
}
