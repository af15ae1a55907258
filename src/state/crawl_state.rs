use crate::config::CrawlConfig;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// The global dedup registry of one crawl run
///
/// Identifiers only ever enter the registry. The stop signal is raised once,
/// by whichever registration first reaches `max_results`, and is advisory:
/// it suppresses new scheduling but never interrupts an in-flight fetch.
///
/// All workers share one instance behind an `Arc`; mutation goes through a
/// mutex so the registry stays correct on a multi-threaded runtime.
#[derive(Debug)]
pub struct CrawlState {
    registry: Mutex<Registry>,
    stop: AtomicBool,
    pa_skip_threshold: f64,
    dedup_threshold: f64,
    max_results: Option<usize>,
}

#[derive(Debug, Default)]
struct Registry {
    identifiers: HashSet<String>,
    skipped_categories: BTreeSet<String>,
}

impl CrawlState {
    pub fn new(pa_skip_threshold: f64, dedup_threshold: f64, max_results: Option<usize>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            stop: AtomicBool::new(false),
            pa_skip_threshold,
            dedup_threshold,
            max_results,
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(
            config.pa_skip_threshold,
            config.dedup_threshold,
            config.max_results,
        )
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Every critical section leaves the registry consistent, so a
        // poisoned lock still guards valid data
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds identifiers to the registry
    ///
    /// # Arguments
    ///
    /// * `identifiers` - Identifiers harvested from one page or checkpoint
    ///
    /// # Returns
    ///
    /// * `true` - `max_results` is set and the registry has reached it; the
    ///   stop signal is raised
    /// * `false` - Otherwise
    pub fn register<I, S>(&self, identifiers: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let len = {
            let mut registry = self.registry();
            registry
                .identifiers
                .extend(identifiers.into_iter().map(Into::into));
            registry.identifiers.len()
        };

        match self.max_results {
            Some(cap) if len >= cap => {
                if !self.stop.swap(true, Ordering::SeqCst) {
                    tracing::info!("Result cap of {} reached, stopping new work", cap);
                }
                true
            }
            _ => false,
        }
    }

    /// Decides whether a page ends its category's pagination
    ///
    /// A page stops its category when it has no cards at all, or when the
    /// share of its identifiers not yet in the registry is strictly below
    /// `dedup_threshold`. Must be called before the page is registered.
    pub fn check_dedup(&self, page_identifiers: &[String], page_card_count: usize) -> bool {
        if page_card_count == 0 {
            return true;
        }

        let registry = self.registry();
        let new = page_identifiers
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| !registry.identifiers.contains(*id))
            .count();

        (new as f64 / page_card_count as f64) < self.dedup_threshold
    }

    /// Share of `identifiers` already in the registry, 0 when empty
    pub fn overlap_ratio(&self, identifiers: &[String]) -> f64 {
        if identifiers.is_empty() {
            return 0.0;
        }

        let registry = self.registry();
        let known = identifiers
            .iter()
            .filter(|id| registry.identifiers.contains(*id))
            .count();

        known as f64 / identifiers.len() as f64
    }

    /// True when `overlap_ratio` strictly exceeds the skip threshold
    pub fn should_skip(&self, overlap_ratio: f64) -> bool {
        overlap_ratio > self.pa_skip_threshold
    }

    pub fn mark_skipped(&self, category: &str) {
        self.registry()
            .skipped_categories
            .insert(category.to_string());
    }

    pub fn skipped_categories(&self) -> Vec<String> {
        self.registry().skipped_categories.iter().cloned().collect()
    }

    /// Raises the stop signal without a cap being reached (e.g. Ctrl-C)
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True when `max_results` is set and has been reached
    pub fn cap_reached(&self) -> bool {
        self.max_results.is_some_and(|cap| self.len() >= cap)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.registry().identifiers.contains(identifier)
    }

    /// Number of distinct identifiers registered
    pub fn len(&self) -> usize {
        self.registry().identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dedup_threshold(&self) -> f64 {
        self.dedup_threshold
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }
}
