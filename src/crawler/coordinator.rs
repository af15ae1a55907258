//! Crawler coordinator - main crawl orchestration logic
//!
//! This module ties the phases together:
//! - Resuming from checkpoints (or clearing them with `force`)
//! - Scout, bulk and fallback inside one browser-pool lifetime
//! - Checkpointing each category as soon as its plan is final
//! - Merging checkpoints into `listings.json` and writing the run summary

use crate::config::Config;
use crate::crawler::{run_bulk, run_fallback, run_scout_resuming, CrawlContext};
use crate::fetch::{FetchChannel, FetchPool, HttpChannel};
use crate::listing::{HtmlListingParser, ListingParser};
use crate::output::{progress_bar, CrawlSummary, RunOutcome};
use crate::state::{CategoryPlan, CrawlState};
use crate::storage::{
    merge_checkpoints, read_json, remove_if_exists, write_json_atomic, Checkpoint, CheckpointStore,
    DataLayout, RecordMap,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Runtime switches for one crawl
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlOptions {
    /// Delete checkpoints and previous output before starting
    pub force: bool,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    ctx: CrawlContext,
    layout: DataLayout,
    light: Arc<dyn FetchChannel>,
    pool: Arc<FetchPool>,
}

impl Coordinator {
    /// Creates a coordinator with the channels described by `config`
    ///
    /// # Arguments
    ///
    /// * `config` - The harvest configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Channels built; no network access has happened yet
    /// * `Err(HarvestError)` - Invalid proxy, viewport or pool definition
    pub fn new(config: &Config) -> crate::Result<Self> {
        let light = Arc::new(HttpChannel::new(&config.light, &config.retry)?);
        let pool = Arc::new(FetchPool::from_config(&config.browser, &config.retry)?);
        let parser = Arc::new(HtmlListingParser::new(
            config.site.detail_path_marker.clone(),
        ));
        Ok(Self::with_channels(config, light, pool, parser))
    }

    /// Creates a coordinator around existing channels
    pub fn with_channels(
        config: &Config,
        light: Arc<dyn FetchChannel>,
        pool: Arc<FetchPool>,
        parser: Arc<dyn ListingParser>,
    ) -> Self {
        let state = Arc::new(CrawlState::from_config(&config.crawl));
        Self {
            ctx: CrawlContext::from_config(config, state, parser),
            layout: DataLayout::new(&config.output.data_dir),
            light,
            pool,
        }
    }

    /// Draws a bar of listing pages fetched on stderr when `visible`
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.ctx.progress = progress_bar("pages", visible);
        self
    }

    /// Shared crawl state, e.g. for raising the stop signal on Ctrl-C
    pub fn state(&self) -> Arc<CrawlState> {
        Arc::clone(&self.ctx.state)
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Runs a complete crawl over `categories`
    ///
    /// Categories that already have a checkpoint are not fetched again;
    /// their identifiers enter the registry at their rank in the scout
    /// order, except for categories that were skipped. The browser pool is
    /// started before the first fetch and stopped afterwards on every path.
    /// If the stop signal is raised without the result cap being reached,
    /// the run ends as interrupted: categories finished so far keep their
    /// checkpoints and no merge happens. If some category could not be
    /// planned, the merge is written but the checkpoints are kept, so the
    /// next run fetches only that category.
    ///
    /// # Errors
    ///
    /// Only unusable storage or a pool that cannot start abort the run.
    /// Per-page and per-category failures are recorded in the summary.
    pub async fn run(
        &self,
        categories: &[String],
        options: CrawlOptions,
    ) -> crate::Result<CrawlSummary> {
        let mut summary = CrawlSummary::new(categories.len());
        self.layout.ensure()?;
        let store = self.layout.checkpoints();
        let listings_path = self.layout.listings_path();

        if options.force {
            let removed = store.delete_all()?;
            remove_if_exists(&listings_path)?;
            tracing::info!("--force: removed {} checkpoint(s) and previous listings", removed);
        }

        let checkpoints = store.load_all()?;

        if checkpoints.is_empty() && listings_path.exists() && self.last_run_was_final() {
            let existing: RecordMap = read_json(&listings_path)?;
            tracing::info!(
                "Crawl already complete ({} records in {}); use --force to re-crawl",
                existing.len(),
                listings_path.display()
            );
            summary.unique_identifiers = existing.len();
            summary.merged_records = existing.len();
            return Ok(self.finish(summary, RunOutcome::AlreadyComplete));
        }

        let pending = categories
            .iter()
            .filter(|slug| !checkpoints.contains_key(*slug))
            .count();
        summary.categories_resumed = categories.len() - pending;

        if summary.categories_resumed > 0 {
            tracing::info!(
                "Resuming: {} categories already checkpointed, {} pending",
                summary.categories_resumed,
                pending
            );
        }

        if pending > 0 && !self.ctx.state.is_stopped() {
            let pool = Arc::clone(&self.pool);
            let concurrency = pool.total_concurrency();
            let store = &store;
            let checkpoints = &checkpoints;
            let phases = pool
                .run(|pool| async move {
                    let result = self
                        .crawl_pending(
                            categories,
                            checkpoints,
                            pool.as_ref(),
                            concurrency,
                            store,
                            &mut summary,
                        )
                        .await;
                    result.map(|()| summary)
                })
                .await?;
            summary = phases?;
        } else {
            for checkpoint in checkpoints.values().filter(|c| !c.skipped) {
                self.ctx.state.register(checkpoint.records.keys().cloned());
            }
        }
        self.ctx.progress.finish();

        summary.unique_identifiers = self.ctx.state.len();

        if self.ctx.state.is_stopped() && !self.ctx.state.cap_reached() {
            tracing::warn!("Crawl interrupted; finished categories are checkpointed");
            return Ok(self.finish(summary, RunOutcome::Interrupted));
        }

        let checkpoints = store.load_all()?;
        let merged = merge_checkpoints(
            checkpoints.values().map(|checkpoint| &checkpoint.records),
            self.ctx.state.max_results(),
        );
        write_json_atomic(&listings_path, &merged)?;
        summary.merged_records = merged.len();

        tracing::info!(
            "Merged {} checkpoint(s) into {} ({} records)",
            checkpoints.len(),
            listings_path.display(),
            merged.len()
        );

        // With the cap reached there is nothing left worth fetching
        if !summary.planning_failures.is_empty() && !self.ctx.state.cap_reached() {
            tracing::warn!(
                "Could not plan {}; checkpoints kept, run again to retry",
                summary.planning_failures.join(", ")
            );
            return Ok(self.finish(summary, RunOutcome::Partial));
        }

        store.delete_all()?;
        Ok(self.finish(summary, RunOutcome::Completed))
    }

    /// Scout, bulk and fallback over the categories without a checkpoint
    async fn crawl_pending(
        &self,
        categories: &[String],
        checkpoints: &BTreeMap<String, Checkpoint>,
        pool: &FetchPool,
        pool_concurrency: usize,
        store: &CheckpointStore,
        summary: &mut CrawlSummary,
    ) -> crate::Result<()> {
        let ctx = &self.ctx;
        let state = &ctx.state;

        let (scouted, scout_stats) =
            run_scout_resuming(ctx, self.light.as_ref(), pool, categories, checkpoints).await;
        summary.scout_pages = scout_stats.pages_fetched;

        let order: Vec<String> = scouted.iter().map(|p| p.slug.clone()).collect();
        let mut plans: BTreeMap<String, CategoryPlan> = scouted
            .into_iter()
            .map(|plan| (plan.slug.clone(), plan))
            .collect();
        let mut written: HashSet<String> = HashSet::new();

        // Skipped and single-page categories are final after scouting, but
        // only if every category was scouted
        if !state.is_stopped() || state.cap_reached() {
            let cap_hit = state.cap_reached();
            checkpoint_where(store, &plans, &order, &mut written, |plan| {
                cap_hit || plan.skip || !plan.has_remaining_pages()
            })?;
        }

        let (blocked, bulk_stats) = run_bulk(ctx, self.light.as_ref(), &mut plans, &order).await;
        summary.bulk_pages = bulk_stats.pages_fetched;
        summary.pages_escalated = blocked.len();

        if !state.is_stopped() || state.cap_reached() {
            let cap_hit = state.cap_reached();
            let awaiting: HashSet<&str> = blocked.iter().map(|t| t.category.as_str()).collect();
            checkpoint_where(store, &plans, &order, &mut written, |plan| {
                cap_hit || plan.stopped_early || !awaiting.contains(plan.slug.as_str())
            })?;
        }

        let fallback_stats =
            run_fallback(ctx, pool, pool_concurrency, &mut plans, &order, blocked).await;
        summary.fallback_pages = fallback_stats.pages_fetched;

        if !state.is_stopped() || state.cap_reached() {
            checkpoint_where(store, &plans, &order, &mut written, |_| true)?;
        }

        summary.pages_failed = plans.values().map(|p| p.failed_pages.len()).sum();
        summary.record_plans(plans.values());
        Ok(())
    }

    /// Whether the previous run left nothing to do
    ///
    /// A run without a readable summary is taken as final, so that a bare
    /// `listings.json` is never re-crawled without `--force`.
    fn last_run_was_final(&self) -> bool {
        let path = self.layout.crawl_summary_path();
        if !path.exists() {
            return true;
        }
        match read_json::<CrawlSummary>(&path) {
            Ok(last) => last.outcome.is_final(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable crawl summary: {}", e);
                true
            }
        }
    }

    fn finish(&self, mut summary: CrawlSummary, outcome: RunOutcome) -> CrawlSummary {
        summary.finish(outcome);
        if let Err(e) = write_json_atomic(&self.layout.crawl_summary_path(), &summary) {
            tracing::error!("Failed to write crawl summary: {}", e);
        }
        summary.log();
        summary
    }
}

/// Checkpoints every not-yet-written, non-failed plan matching `is_final`
fn checkpoint_where<F>(
    store: &CheckpointStore,
    plans: &BTreeMap<String, CategoryPlan>,
    order: &[String],
    written: &mut HashSet<String>,
    is_final: F,
) -> crate::Result<()>
where
    F: Fn(&CategoryPlan) -> bool,
{
    for slug in order {
        let Some(plan) = plans.get(slug) else {
            continue;
        };
        // No checkpoint means the next run fetches the category again
        if plan.planning_failed || written.contains(slug) || !is_final(plan) {
            continue;
        }
        store.write(slug, &plan.checkpoint())?;
        written.insert(slug.clone());
    }
    Ok(())
}

/// Runs a complete crawl operation
///
/// This is the main entry point for a crawl. It will:
/// 1. Build the light channel, browser pool and listing parser
/// 2. Resume from any checkpoints in the data directory
/// 3. Scout, bulk-fetch and mop up the remaining categories
/// 4. Merge everything into `listings.json`
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `categories` - Category slugs to crawl
/// * `options` - Runtime switches
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Crawl finished, was already complete, or was interrupted
/// * `Err(HarvestError)` - Crawl could not run
pub async fn run_crawl(
    config: &Config,
    categories: &[String],
    options: CrawlOptions,
) -> crate::Result<CrawlSummary> {
    let coordinator = Coordinator::new(config)?;
    coordinator.run(categories, options).await
}
