//! Concurrent fetching with ordered replay
//!
//! Every target is fetched concurrently, but results are folded strictly in
//! the order the targets were supplied (category rank, then page number).
//! A page's early-stop decision depends on all earlier pages of its category
//! having been folded first, so a result is never acted on when it arrives:
//! it is parked in a [`ReplayTable`] until everything before it is done.

use crate::fetch::{FetchChannel, FetchOutcome};
use crate::state::{CrawlState, FetchTarget};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// What the fold decided after one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    Continue,

    /// No further pages of this page's category are fetched or folded
    StopCategory,

    /// Nothing further is fetched or folded in this phase
    StopAll,
}

/// Out-of-order results keyed by their position in the replay order
#[derive(Debug)]
pub struct ReplayTable<T> {
    pending: BTreeMap<usize, T>,
    cursor: usize,
}

impl<T> ReplayTable<T> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            cursor: 0,
        }
    }

    pub fn insert(&mut self, position: usize, item: T) {
        self.pending.insert(position, item);
    }

    /// Returns the next item in replay order once it has arrived
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.cursor)?;
        self.cursor += 1;
        Some(item)
    }

    /// Number of results waiting for an earlier one
    pub fn parked(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for ReplayTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters from one ordered fetch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Results handed to the fold
    pub folded: usize,

    /// Targets never fetched because their gate was closed
    pub cancelled: usize,

    /// Results that arrived after their category or phase had stopped
    pub discarded: usize,
}

/// Stop decisions taken during one pass, checked before every fetch
struct Gate<'a> {
    state: &'a CrawlState,
    stopped: Mutex<HashSet<String>>,
    halted: AtomicBool,
}

impl<'a> Gate<'a> {
    fn new(state: &'a CrawlState) -> Self {
        Self {
            state,
            stopped: Mutex::new(HashSet::new()),
            halted: AtomicBool::new(false),
        }
    }

    fn is_closed(&self, category: &str) -> bool {
        self.halted.load(Ordering::SeqCst)
            || self.state.is_stopped()
            || self
                .stopped
                .lock()
                .map(|stopped| stopped.contains(category))
                .unwrap_or(true)
    }

    fn stop_category(&self, category: String) {
        if let Ok(mut stopped) = self.stopped.lock() {
            stopped.insert(category);
        }
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

/// Fetches `targets` through `channel` and folds the results in order
///
/// At most `concurrency` fetches are in flight. Before each fetch the gate
/// is checked: a target whose category was stopped by the fold, or any
/// target once the fold returned [`Replay::StopAll`] or the global stop
/// signal was raised, is cancelled without touching the network. In-flight
/// fetches are never interrupted; their results are discarded instead.
///
/// # Arguments
///
/// * `channel` - Channel used for every fetch
/// * `state` - Crawl state whose stop signal closes the gate
/// * `targets` - Targets in replay order
/// * `concurrency` - Maximum fetches in flight
/// * `fold` - Called once per result, strictly in target order
pub async fn fetch_in_order<F>(
    channel: &dyn FetchChannel,
    state: &CrawlState,
    targets: Vec<FetchTarget>,
    concurrency: usize,
    mut fold: F,
) -> ReplayStats
where
    F: FnMut(FetchTarget, FetchOutcome) -> Replay,
{
    let gate = Gate::new(state);
    let gate_ref = &gate;

    let mut results = stream::iter(targets.into_iter().enumerate())
        .map(|(position, target)| async move {
            if gate_ref.is_closed(&target.category) {
                return (position, target, None);
            }
            let outcome = channel
                .fetch(&target.url, Some(target.referer.as_str()))
                .await;
            (position, target, Some(outcome))
        })
        .buffer_unordered(concurrency.max(1));

    let mut table = ReplayTable::new();
    let mut stats = ReplayStats::default();

    while let Some((position, target, outcome)) = results.next().await {
        table.insert(position, (target, outcome));

        while let Some((target, outcome)) = table.pop_ready() {
            let Some(outcome) = outcome else {
                stats.cancelled += 1;
                continue;
            };

            if gate.is_closed(&target.category) {
                tracing::debug!(
                    "Discarding {} page {} (category stopped)",
                    target.category,
                    target.page_number
                );
                stats.discarded += 1;
                continue;
            }

            stats.folded += 1;
            let category = target.category.clone();
            match fold(target, outcome) {
                Replay::Continue => {}
                Replay::StopCategory => gate.stop_category(category),
                Replay::StopAll => gate.halt(),
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Finishes later pages first so arrival order is the reverse of page order
    struct ReversingChannel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchChannel for ReversingChannel {
        async fn fetch(&self, url: &str, _referer: Option<&str>) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page: u64 = url.rsplit('=').next().unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(60u64.saturating_sub(page * 10))).await;
            FetchOutcome::success(url.to_string(), 200)
        }

        fn name(&self) -> &str {
            "reversing"
        }
    }

    fn targets(category: &str, pages: std::ops::RangeInclusive<u32>) -> Vec<FetchTarget> {
        pages
            .map(|p| FetchTarget::new("https://d.test/{category}?page={page}", category, p, "r"))
            .collect()
    }

    #[test]
    fn test_replay_table_releases_in_order() {
        let mut table = ReplayTable::new();
        table.insert(2, "c");
        table.insert(1, "b");
        assert_eq!(table.pop_ready(), None);
        table.insert(0, "a");
        assert_eq!(table.pop_ready(), Some("a"));
        assert_eq!(table.pop_ready(), Some("b"));
        assert_eq!(table.pop_ready(), Some("c"));
        assert_eq!(table.pop_ready(), None);
        assert_eq!(table.parked(), 0);
    }

    #[tokio::test]
    async fn test_results_folded_in_target_order() {
        let channel = ReversingChannel {
            calls: AtomicUsize::new(0),
        };
        let state = CrawlState::new(0.8, 0.1, None);
        let mut seen = Vec::new();

        let stats = fetch_in_order(&channel, &state, targets("a", 1..=5), 5, |target, _| {
            seen.push(target.page_number);
            Replay::Continue
        })
        .await;

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(stats.folded, 5);
    }

    #[tokio::test]
    async fn test_stop_category_cancels_later_pages() {
        let channel = ReversingChannel {
            calls: AtomicUsize::new(0),
        };
        let state = CrawlState::new(0.8, 0.1, None);
        let mut all = targets("a", 1..=4);
        all.extend(targets("b", 1..=2));
        let mut seen = Vec::new();

        // Serial fetching: the stop is decided before later pages are scheduled
        let stats = fetch_in_order(&channel, &state, all, 1, |target, _| {
            seen.push((target.category.clone(), target.page_number));
            if target.category == "a" && target.page_number == 2 {
                Replay::StopCategory
            } else {
                Replay::Continue
            }
        })
        .await;

        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 1),
                ("b".to_string(), 2)
            ]
        );
        assert_eq!(stats.cancelled, 2);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stop_all_halts_everything() {
        let channel = ReversingChannel {
            calls: AtomicUsize::new(0),
        };
        let state = CrawlState::new(0.8, 0.1, None);
        let mut folded = 0;

        let stats = fetch_in_order(&channel, &state, targets("a", 1..=5), 1, |_, _| {
            folded += 1;
            Replay::StopAll
        })
        .await;

        assert_eq!(folded, 1);
        assert_eq!(stats.cancelled, 4);
    }

    #[tokio::test]
    async fn test_global_stop_cancels_before_fetch() {
        let channel = ReversingChannel {
            calls: AtomicUsize::new(0),
        };
        let state = CrawlState::new(0.8, 0.1, None);
        state.request_stop();

        let stats =
            fetch_in_order(&channel, &state, targets("a", 1..=3), 3, |_, _| Replay::Continue).await;

        assert_eq!(stats.cancelled, 3);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    }
}
