use crate::listing::ListingRecord;
use crate::storage::Checkpoint;
use crate::url::listing_url;
use std::collections::BTreeMap;

/// One listing page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub category: String,
    pub page_number: u32,
    pub url: String,
    pub referer: String,
}

impl FetchTarget {
    /// Builds the target for `page_number` of `category` from the URL template
    pub fn new(template: &str, category: &str, page_number: u32, referer: &str) -> Self {
        Self {
            category: category.to_string(),
            page_number,
            url: listing_url(template, category, page_number),
            referer: referer.to_string(),
        }
    }
}

/// Decisions and harvested records for one category
///
/// Created by the scout, then mutated only by whichever phase currently owns
/// the category. `skip` and `overlap_ratio` are fixed at creation;
/// `known_records` only grows; `stopped_early` is set at most once.
#[derive(Debug, Clone, Default)]
pub struct CategoryPlan {
    pub slug: String,

    /// Total pages as read from page-1 pagination, capped; None until scouted
    pub page_count: Option<u32>,

    /// Records harvested for this category, keyed by identifier
    pub known_records: BTreeMap<String, ListingRecord>,

    /// Share of page-1 identifiers already known when the category was scouted
    pub overlap_ratio: f64,

    /// Category was redundant with ones planned before it
    pub skip: bool,

    /// Pagination ended before the last page
    pub stopped_early: bool,

    /// Page 1 was unreachable on both channels
    pub planning_failed: bool,

    /// Number of cards found on page 1
    pub page1_cards: usize,

    /// Pages whose records were folded in (including page 1)
    pub pages_fetched: u32,

    /// Pages that failed on every channel
    pub failed_pages: Vec<u32>,
}

impl CategoryPlan {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Default::default()
        }
    }

    /// A category whose first page could not be fetched at all
    pub fn planning_failure(slug: impl Into<String>) -> Self {
        Self {
            planning_failed: true,
            failed_pages: vec![1],
            ..Self::new(slug)
        }
    }

    /// Adds one page's records, keeping the first occurrence of each identifier
    ///
    /// # Returns
    ///
    /// The page's identifiers in card order
    pub fn absorb(&mut self, records: Vec<ListingRecord>) -> Vec<String> {
        let mut identifiers = Vec::with_capacity(records.len());
        for record in records {
            identifiers.push(record.identifier.clone());
            self.known_records
                .entry(record.identifier.clone())
                .or_insert(record);
        }
        self.pages_fetched += 1;
        identifiers
    }

    /// True while the category still has pages worth fetching
    pub fn is_active(&self) -> bool {
        !self.skip && !self.planning_failed && !self.stopped_early
    }

    /// Last page of the category (1 when no pagination was found)
    pub fn last_page(&self) -> u32 {
        self.page_count.unwrap_or(1).max(1)
    }

    /// True when an active category has pages beyond the first
    pub fn has_remaining_pages(&self) -> bool {
        self.is_active() && self.last_page() > 1
    }

    /// Targets for pages `2..=last_page`, empty unless the category is active
    pub fn remaining_targets(&self, template: &str, referer: &str) -> Vec<FetchTarget> {
        if !self.is_active() {
            return Vec::new();
        }
        (2..=self.last_page())
            .map(|page| FetchTarget::new(template, &self.slug, page, referer))
            .collect()
    }

    pub fn record_failure(&mut self, page_number: u32) {
        if !self.failed_pages.contains(&page_number) {
            self.failed_pages.push(page_number);
        }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.known_records.keys()
    }

    /// The checkpoint written once this plan is final
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            skipped: self.skip,
            page_count: self.last_page(),
            records: self.known_records.clone(),
        }
    }
}
