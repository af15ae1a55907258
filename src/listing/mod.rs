//! Listing page extraction
//!
//! The crawl core only needs two things from a listing document: the cards
//! on it (identifier plus the partial fields a card carries) and the total
//! number of pages in the category. Both sit behind [`ListingParser`] so the
//! orchestrators never touch HTML directly.

mod parser;
mod record;

pub use parser::HtmlListingParser;
pub use record::ListingRecord;

use url::Url;

/// Extracts listing cards and pagination from a fetched listing document
pub trait ListingParser: Send + Sync {
    /// Returns the cards on the page, deduplicated by identifier, in page order
    fn parse_listing(&self, document: &str, page_url: &Url) -> Vec<ListingRecord>;

    /// Returns the category's total page count, or None when the document
    /// carries no pagination (a single-page category)
    fn parse_page_count(&self, document: &str, page_url: &Url) -> Option<u32>;
}
