//! Fallback phase: blocked pages through the browser pool

use crate::crawler::scheduler::fetch_in_order;
use crate::crawler::walk::{OnBlocked, PageWalker, PhaseStats};
use crate::crawler::CrawlContext;
use crate::fetch::FetchChannel;
use crate::state::{CategoryPlan, FetchTarget};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Builds the mop-up queue from pages blocked in earlier phases
///
/// Each page appears once, sorted by category rank in `order` and then by
/// page number. Pages of categories that already stopped early are dropped.
pub fn fallback_queue(
    blocked: Vec<FetchTarget>,
    plans: &BTreeMap<String, CategoryPlan>,
    order: &[String],
) -> Vec<FetchTarget> {
    let rank: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, slug)| (slug.as_str(), i))
        .collect();

    let mut seen = HashSet::new();
    let mut queue: Vec<FetchTarget> = blocked
        .into_iter()
        .filter(|t| plans.get(&t.category).is_some_and(|p| !p.stopped_early))
        .filter(|t| seen.insert((t.category.clone(), t.page_number)))
        .collect();

    queue.sort_by_key(|t| {
        (
            rank.get(t.category.as_str()).copied().unwrap_or(usize::MAX),
            t.page_number,
        )
    });
    queue
}

/// Re-fetches blocked pages through `pool` with the same early-stop rules
///
/// A page that is still blocked here is recorded as failed; there is no
/// heavier channel left to try.
pub async fn run_fallback(
    ctx: &CrawlContext,
    pool: &dyn FetchChannel,
    pool_concurrency: usize,
    plans: &mut BTreeMap<String, CategoryPlan>,
    order: &[String],
    blocked: Vec<FetchTarget>,
) -> PhaseStats {
    let queue = fallback_queue(blocked, plans, order);
    if queue.is_empty() {
        tracing::info!("Fallback phase: nothing to mop up");
        return PhaseStats::default();
    }

    tracing::info!(
        "Fallback phase: {} blocked pages through {}",
        queue.len(),
        pool.name()
    );
    ctx.progress.inc_length(queue.len() as u64);

    let mut walker = PageWalker::new(&ctx.state, ctx.parser.as_ref(), plans, OnBlocked::Fail)
        .with_progress(ctx.progress.clone());
    let replay = fetch_in_order(pool, &ctx.state, queue, pool_concurrency, |target, outcome| {
        walker.fold(target, outcome)
    })
    .await;

    let (_, mut stats) = walker.finish();
    stats.pages_cancelled = replay.cancelled + replay.discarded;

    tracing::info!(
        "Fallback phase done: {} fetched, {} still blocked, {} failed",
        stats.pages_fetched,
        stats.pages_blocked,
        stats.pages_failed
    );

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(category: &str, page: u32) -> FetchTarget {
        FetchTarget::new("https://d.test/{category}?page={page}", category, page, "r")
    }

    #[test]
    fn test_every_blocked_page_queued_exactly_once() {
        let order = vec!["big".to_string(), "small".to_string()];
        let mut plans = BTreeMap::new();
        plans.insert("big".to_string(), CategoryPlan::new("big"));
        plans.insert("small".to_string(), CategoryPlan::new("small"));

        let blocked = vec![
            target("small", 3),
            target("big", 5),
            target("big", 2),
            target("small", 3),
            target("big", 5),
        ];

        let queue = fallback_queue(blocked, &plans, &order);
        let keys: Vec<(&str, u32)> = queue
            .iter()
            .map(|t| (t.category.as_str(), t.page_number))
            .collect();

        assert_eq!(keys, vec![("big", 2), ("big", 5), ("small", 3)]);
    }

    #[test]
    fn test_stopped_categories_dropped() {
        let order = vec!["a".to_string(), "b".to_string()];
        let mut plans = BTreeMap::new();
        let mut stopped = CategoryPlan::new("a");
        stopped.stopped_early = true;
        plans.insert("a".to_string(), stopped);
        plans.insert("b".to_string(), CategoryPlan::new("b"));

        let queue = fallback_queue(vec![target("a", 2), target("b", 4)], &plans, &order);
        assert_eq!(queue, vec![target("b", 4)]);
    }
}
