//! Folding fetched listing pages into category plans
//!
//! The bulk and fallback phases share one fold. The only difference is what
//! happens to a blocked page: bulk queues it for escalation, fallback has
//! nowhere left to escalate and records it as failed.

use crate::crawler::scheduler::Replay;
use crate::fetch::{FetchOutcome, FetchStatus};
use crate::listing::ListingParser;
use crate::state::{CategoryPlan, CrawlState, FetchTarget};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use url::Url;

/// What to do with a page the channel reported as blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnBlocked {
    Escalate,
    Fail,
}

/// Per-phase page counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub pages_fetched: usize,
    pub pages_blocked: usize,
    pub pages_failed: usize,
    pub pages_cancelled: usize,
    pub categories_stopped: usize,
}

/// Applies fetched pages to the plans that own them
pub struct PageWalker<'a> {
    state: &'a CrawlState,
    parser: &'a dyn ListingParser,
    plans: &'a mut BTreeMap<String, CategoryPlan>,
    on_blocked: OnBlocked,
    escalated: Vec<FetchTarget>,
    stats: PhaseStats,
    progress: ProgressBar,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        state: &'a CrawlState,
        parser: &'a dyn ListingParser,
        plans: &'a mut BTreeMap<String, CategoryPlan>,
        on_blocked: OnBlocked,
    ) -> Self {
        Self {
            state,
            parser,
            plans,
            on_blocked,
            escalated: Vec::new(),
            stats: PhaseStats::default(),
            progress: ProgressBar::hidden(),
        }
    }

    /// Ticks `progress` once for every page folded
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Folds one page result into its category
    ///
    /// | Result | Effect |
    /// |--------|--------|
    /// | Blocked | queued for escalation, or recorded as failed |
    /// | Failed | recorded as failed, category continues |
    /// | Zero cards | category stops early |
    /// | Cards | dedup checked, then records absorbed and registered |
    ///
    /// The dedup check runs before the page is registered so its own
    /// identifiers count as new. Reaching the result cap halts the phase.
    pub fn fold(&mut self, target: FetchTarget, outcome: FetchOutcome) -> Replay {
        self.progress.inc(1);

        let Some(plan) = self.plans.get_mut(&target.category) else {
            tracing::warn!("No plan for category {}", target.category);
            return Replay::Continue;
        };

        match outcome.status {
            FetchStatus::Blocked => {
                self.stats.pages_blocked += 1;
                match self.on_blocked {
                    OnBlocked::Escalate => {
                        tracing::debug!(
                            "Queueing {} page {} for fallback",
                            target.category,
                            target.page_number
                        );
                        self.escalated.push(target);
                    }
                    OnBlocked::Fail => {
                        tracing::warn!(
                            "{} page {} still blocked on {}",
                            target.category,
                            target.page_number,
                            outcome.channel
                        );
                        plan.record_failure(target.page_number);
                    }
                }
                return Replay::Continue;
            }
            FetchStatus::Failed => {
                self.stats.pages_failed += 1;
                tracing::warn!(
                    "{} page {} failed: {}",
                    target.category,
                    target.page_number,
                    outcome.message.as_deref().unwrap_or("unknown error")
                );
                plan.record_failure(target.page_number);
                return Replay::Continue;
            }
            FetchStatus::Success => {}
        }

        let body = outcome.body.unwrap_or_default();
        let records = match Url::parse(&target.url) {
            Ok(page_url) => self.parser.parse_listing(&body, &page_url),
            Err(e) => {
                tracing::warn!("Unparseable page URL {}: {}", target.url, e);
                plan.record_failure(target.page_number);
                return Replay::Continue;
            }
        };
        self.stats.pages_fetched += 1;

        if records.is_empty() {
            tracing::info!(
                "{}: page {} has no cards, stopping",
                target.category,
                target.page_number
            );
            plan.stopped_early = true;
            self.stats.categories_stopped += 1;
            return Replay::StopCategory;
        }

        let card_count = records.len();
        let identifiers: Vec<String> = records.iter().map(|r| r.identifier.clone()).collect();
        let should_stop = self.state.check_dedup(&identifiers, card_count);

        plan.absorb(records);
        let reached_cap = self.state.register(identifiers);

        tracing::debug!(
            "{} page {}: {} cards, {} unique identifiers so far",
            target.category,
            target.page_number,
            card_count,
            self.state.len()
        );

        if reached_cap {
            return Replay::StopAll;
        }

        if should_stop {
            tracing::info!(
                "{}: page {} below dedup threshold, stopping early",
                target.category,
                target.page_number
            );
            plan.stopped_early = true;
            self.stats.categories_stopped += 1;
            return Replay::StopCategory;
        }

        Replay::Continue
    }

    /// Pages queued for escalation, in the order they were folded
    pub fn finish(self) -> (Vec<FetchTarget>, PhaseStats) {
        (self.escalated, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FailureKind;
    use crate::listing::ListingRecord;

    /// Parses a body of comma-separated identifiers
    struct CsvParser;

    impl ListingParser for CsvParser {
        fn parse_listing(&self, document: &str, _page_url: &Url) -> Vec<ListingRecord> {
            document
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|id| ListingRecord::new(id, format!("https://p.test/{}.html", id)))
                .collect()
        }

        fn parse_page_count(&self, _document: &str, _page_url: &Url) -> Option<u32> {
            None
        }
    }

    fn target(page: u32) -> FetchTarget {
        FetchTarget::new("https://d.test/{category}?page={page}", "tax", page, "r")
    }

    fn body(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn plans() -> BTreeMap<String, CategoryPlan> {
        let mut plans = BTreeMap::new();
        plans.insert("tax".to_string(), CategoryPlan::new("tax"));
        plans
    }

    #[test]
    fn test_zero_cards_stops_category() {
        let state = CrawlState::new(0.8, 0.0, None);
        let mut plans = plans();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate);

        let replay = walker.fold(target(2), FetchOutcome::success(String::new(), 200));

        assert_eq!(replay, Replay::StopCategory);
        drop(walker);
        assert!(plans["tax"].stopped_early);
    }

    #[test]
    fn test_low_yield_page_absorbed_then_stops() {
        let state = CrawlState::new(0.8, 0.10, None);
        state.register((0..19).map(|i| format!("old{}", i)));
        let mut plans = plans();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate);

        let page = format!("{},fresh0", body("old", 19));
        let replay = walker.fold(target(3), FetchOutcome::success(page, 200));

        assert_eq!(replay, Replay::StopCategory);
        assert!(state.contains("fresh0"));
        drop(walker);
        assert!(plans["tax"].known_records.contains_key("fresh0"));
        assert!(plans["tax"].stopped_early);
    }

    #[test]
    fn test_blocked_escalated_or_failed() {
        let state = CrawlState::new(0.8, 0.1, None);

        let mut plans = plans();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate);
        assert_eq!(
            walker.fold(target(4), FetchOutcome::blocked(None, Some(403))),
            Replay::Continue
        );
        let (escalated, stats) = walker.finish();
        assert_eq!(escalated, vec![target(4)]);
        assert_eq!(stats.pages_blocked, 1);
        assert!(plans["tax"].failed_pages.is_empty());

        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Fail);
        walker.fold(target(4), FetchOutcome::blocked(None, Some(403)));
        let (escalated, _) = walker.finish();
        assert!(escalated.is_empty());
        assert_eq!(plans["tax"].failed_pages, vec![4]);
    }

    #[test]
    fn test_failed_page_does_not_stop() {
        let state = CrawlState::new(0.8, 0.1, None);
        let mut plans = plans();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate);

        let outcome = FetchOutcome::failed(FailureKind::NotFound, Some(404), "HTTP 404");
        assert_eq!(walker.fold(target(2), outcome), Replay::Continue);
        let (_, stats) = walker.finish();
        assert_eq!(stats.pages_failed, 1);
        assert!(!plans["tax"].stopped_early);
    }

    #[test]
    fn test_every_folded_page_ticks_progress() {
        let state = CrawlState::new(0.8, 0.1, None);
        let mut plans = plans();
        let progress = ProgressBar::hidden();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate)
            .with_progress(progress.clone());

        walker.fold(target(2), FetchOutcome::success(body("a", 3), 200));
        walker.fold(target(3), FetchOutcome::blocked(None, Some(403)));
        walker.fold(
            target(4),
            FetchOutcome::failed(FailureKind::NotFound, Some(404), "HTTP 404"),
        );

        assert_eq!(progress.position(), 3);
    }

    #[test]
    fn test_cap_halts_phase() {
        let state = CrawlState::new(0.8, 0.1, Some(5));
        let mut plans = plans();
        let mut walker = PageWalker::new(&state, &CsvParser, &mut plans, OnBlocked::Escalate);

        let replay = walker.fold(target(2), FetchOutcome::success(body("n", 6), 200));
        assert_eq!(replay, Replay::StopAll);
        assert!(state.is_stopped());
    }
}
