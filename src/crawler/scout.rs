//! Scout phase: plan every category from its first page
//!
//! Page 1 of every category is fetched concurrently through the light
//! channel, escalating to the pool when blocked. Categories are then sorted
//! by page count, most populous first, and judged one by one against the
//! registry: a category whose page 1 is mostly already known is skipped.
//!
//! Categories checkpointed by an earlier run are not fetched. They take
//! their recorded rank in the sort and their identifiers enter the registry
//! at that point, so every pending category is judged against the same
//! registry an uninterrupted run would have shown it.

use crate::crawler::walk::PhaseStats;
use crate::crawler::CrawlContext;
use crate::fetch::{FetchChannel, FetchOutcome};
use crate::listing::ListingRecord;
use crate::state::{CategoryPlan, FetchTarget};
use crate::storage::Checkpoint;
use futures::stream::{self, StreamExt};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Fetches one page on the light channel, retrying on the pool if blocked
pub async fn fetch_with_escalation(
    light: &dyn FetchChannel,
    pool: &dyn FetchChannel,
    url: &str,
    referer: Option<&str>,
) -> FetchOutcome {
    let outcome = light.fetch(url, referer).await;
    if !outcome.is_blocked() {
        return outcome;
    }

    tracing::debug!("Escalating {} to {}", url, pool.name());
    pool.fetch(url, referer).await
}

/// One category in the scout sort
enum Scouted<'a> {
    Planned(CategoryPlan, Vec<ListingRecord>),
    Resumed(&'a str, &'a Checkpoint),
}

impl Scouted<'_> {
    fn rank(&self) -> u32 {
        match self {
            Self::Planned(plan, _) => plan.last_page(),
            Self::Resumed(_, checkpoint) => checkpoint.page_count.max(1),
        }
    }
}

/// Plans every category
///
/// # Arguments
///
/// * `ctx` - Shared crawl context
/// * `light` - Lightweight channel
/// * `pool` - Heavyweight channel used for blocked first pages
/// * `categories` - Category slugs to plan, in input order
///
/// # Returns
///
/// Plans in processing order (page count descending, input order on ties)
/// and the phase counters. Categories whose first page could not be fetched
/// come back as planning failures; they are never skipped or walked.
pub async fn run_scout(
    ctx: &CrawlContext,
    light: &dyn FetchChannel,
    pool: &dyn FetchChannel,
    categories: &[String],
) -> (Vec<CategoryPlan>, PhaseStats) {
    run_scout_resuming(ctx, light, pool, categories, &BTreeMap::new()).await
}

/// Plans the categories of `categories` that have no checkpoint in `resumed`
///
/// Once the stop signal is raised no further first page is fetched, and a
/// category left unfetched gets no plan at all. Once the result cap is
/// reached nothing more is registered; categories judged after that point
/// come back stopped early with no records.
pub async fn run_scout_resuming(
    ctx: &CrawlContext,
    light: &dyn FetchChannel,
    pool: &dyn FetchChannel,
    categories: &[String],
    resumed: &BTreeMap<String, Checkpoint>,
) -> (Vec<CategoryPlan>, PhaseStats) {
    let targets: Vec<FetchTarget> = categories
        .iter()
        .filter(|slug| !resumed.contains_key(*slug))
        .map(|slug| ctx.target(slug, 1))
        .collect();

    tracing::info!("Scouting {} categories", targets.len());
    ctx.progress.inc_length(targets.len() as u64);

    let mut outcomes: HashMap<String, Option<FetchOutcome>> = stream::iter(targets)
        .map(|target| async move {
            if ctx.state.is_stopped() {
                return (target.category, None);
            }
            let outcome =
                fetch_with_escalation(light, pool, &target.url, Some(target.referer.as_str()))
                    .await;
            ctx.progress.inc(1);
            (target.category, Some(outcome))
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    let mut stats = PhaseStats::default();

    // Checkpoints outside this run's input have no rank; they count first
    for (slug, checkpoint) in resumed {
        if !checkpoint.skipped && !categories.contains(slug) {
            ctx.state.register(checkpoint.records.keys().cloned());
        }
    }

    let mut scouted: Vec<Scouted<'_>> = Vec::with_capacity(categories.len());
    for slug in categories {
        if let Some(checkpoint) = resumed.get(slug) {
            scouted.push(Scouted::Resumed(slug, checkpoint));
            continue;
        }

        match outcomes.remove(slug) {
            Some(None) => {
                stats.pages_cancelled += 1;
                tracing::debug!("Not scouting {}: stop requested", slug);
            }
            Some(Some(outcome)) if outcome.is_success() => {
                stats.pages_fetched += 1;
                let (plan, records) = plan_from_first_page(ctx, slug, outcome);
                scouted.push(Scouted::Planned(plan, records));
            }
            other => {
                let outcome = other.flatten();
                if outcome.as_ref().is_some_and(|o| o.is_blocked()) {
                    stats.pages_blocked += 1;
                } else {
                    stats.pages_failed += 1;
                }
                tracing::warn!(
                    "Planning failed for {}: {}",
                    slug,
                    outcome
                        .as_ref()
                        .and_then(|o| o.message.as_deref())
                        .unwrap_or("no response")
                );
                scouted.push(Scouted::Planned(
                    CategoryPlan::planning_failure(slug.as_str()),
                    Vec::new(),
                ));
            }
        }
    }

    // Stable: equal page counts keep input order
    scouted.sort_by_key(|entry| Reverse(entry.rank()));

    let mut capped = ctx.state.cap_reached();
    let mut plans = Vec::with_capacity(scouted.len());
    for entry in scouted {
        let (mut plan, records) = match entry {
            Scouted::Resumed(slug, checkpoint) => {
                if !checkpoint.skipped && !capped {
                    tracing::debug!(
                        "Registering {} identifiers from checkpoint {}",
                        checkpoint.records.len(),
                        slug
                    );
                    capped = ctx.state.register(checkpoint.records.keys().cloned());
                }
                continue;
            }
            Scouted::Planned(plan, records) => (plan, records),
        };

        if plan.planning_failed {
            plans.push(plan);
            continue;
        }

        if capped {
            tracing::debug!("Result cap reached, not planning {}", plan.slug);
            plan.stopped_early = true;
            plans.push(plan);
            continue;
        }

        let identifiers: Vec<String> = records.iter().map(|r| r.identifier.clone()).collect();
        plan.overlap_ratio = ctx.state.overlap_ratio(&identifiers);
        plan.absorb(records);

        if ctx.state.should_skip(plan.overlap_ratio) {
            plan.skip = true;
            ctx.state.mark_skipped(&plan.slug);
            tracing::info!(
                "Skipping {}: {:.0}% of page 1 already known",
                plan.slug,
                plan.overlap_ratio * 100.0
            );
        } else {
            capped = ctx.state.register(identifiers);
            tracing::info!(
                "Planned {}: {} pages, {:.0}% overlap",
                plan.slug,
                plan.last_page(),
                plan.overlap_ratio * 100.0
            );
        }

        plans.push(plan);
    }

    (plans, stats)
}

/// Page count and records from a fetched first page
fn plan_from_first_page(
    ctx: &CrawlContext,
    slug: &str,
    outcome: FetchOutcome,
) -> (CategoryPlan, Vec<ListingRecord>) {
    let body = outcome.body.unwrap_or_default();
    let target = ctx.target(slug, 1);

    let mut plan = CategoryPlan::new(slug);
    let records = match Url::parse(&target.url) {
        Ok(page_url) => {
            let records = ctx.parser.parse_listing(&body, &page_url);
            plan.page_count = if records.is_empty() {
                Some(1)
            } else {
                let parsed = ctx.parser.parse_page_count(&body, &page_url).unwrap_or(1);
                Some(parsed.clamp(1, ctx.max_pages.max(1)))
            };
            records
        }
        Err(e) => {
            tracing::warn!("Unparseable page URL {}: {}", target.url, e);
            plan.page_count = Some(1);
            Vec::new()
        }
    };
    plan.page1_cards = records.len();

    tracing::debug!(
        "Scouted {}: {} cards, {} pages",
        slug,
        plan.page1_cards,
        plan.last_page()
    );
    (plan, records)
}
