//! State module for tracking crawl progress
//!
//! This module holds the process-wide and per-category state of one crawl run.
//!
//! # Components
//!
//! - `CrawlState`: the global dedup registry, stop signal and thresholds shared by every worker
//! - `CategoryPlan`: per-category decisions and the records harvested for it
//! - `FetchTarget`: one listing page to fetch

mod category_plan;
mod crawl_state;

// Re-export main types
pub use category_plan::{CategoryPlan, FetchTarget};
pub use crawl_state::CrawlState;
