//! Bulk phase: every remaining page through the light channel

use crate::crawler::scheduler::fetch_in_order;
use crate::crawler::walk::{OnBlocked, PageWalker, PhaseStats};
use crate::crawler::CrawlContext;
use crate::fetch::FetchChannel;
use crate::state::{CategoryPlan, FetchTarget};
use std::collections::BTreeMap;

/// Walks pages `2..=page_count` of every active category
///
/// `order` lists category slugs in processing order; targets are replayed
/// category by category in that order, pages ascending.
///
/// # Returns
///
/// The blocked pages to mop up, in replay order, and the phase counters.
pub async fn run_bulk(
    ctx: &CrawlContext,
    light: &dyn FetchChannel,
    plans: &mut BTreeMap<String, CategoryPlan>,
    order: &[String],
) -> (Vec<FetchTarget>, PhaseStats) {
    let targets: Vec<FetchTarget> = order
        .iter()
        .filter_map(|slug| plans.get(slug))
        .flat_map(|plan| plan.remaining_targets(&ctx.listing_url, &ctx.referer))
        .collect();

    if targets.is_empty() {
        tracing::info!("Bulk phase: nothing to fetch");
        return (Vec::new(), PhaseStats::default());
    }

    tracing::info!(
        "Bulk phase: {} pages across {} categories",
        targets.len(),
        order.iter().filter(|s| plans.get(*s).is_some_and(|p| p.is_active())).count()
    );
    ctx.progress.inc_length(targets.len() as u64);

    let mut walker = PageWalker::new(&ctx.state, ctx.parser.as_ref(), plans, OnBlocked::Escalate)
        .with_progress(ctx.progress.clone());
    let replay = fetch_in_order(light, &ctx.state, targets, ctx.concurrency, |target, outcome| {
        walker.fold(target, outcome)
    })
    .await;

    let (blocked, mut stats) = walker.finish();
    stats.pages_cancelled = replay.cancelled + replay.discarded;

    tracing::info!(
        "Bulk phase done: {} fetched, {} blocked, {} failed, {} categories stopped early",
        stats.pages_fetched,
        stats.pages_blocked,
        stats.pages_failed,
        stats.categories_stopped
    );

    (blocked, stats)
}
