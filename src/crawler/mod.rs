//! Crawler module for listing-page harvesting
//!
//! This module contains the core crawl orchestration, including:
//! - Scout: page 1 of every category, page counts and skip decisions
//! - Bulk: all remaining pages through the light channel, replayed in order
//! - Fallback: blocked pages through the browser pool
//! - Overall coordination with per-category checkpoints and the final merge

mod bulk;
mod coordinator;
mod fallback;
mod scheduler;
mod scout;
mod walk;

pub use bulk::run_bulk;
pub use coordinator::{run_crawl, Coordinator, CrawlOptions};
pub use fallback::{fallback_queue, run_fallback};
pub use scheduler::{fetch_in_order, Replay, ReplayStats, ReplayTable};
pub use scout::{fetch_with_escalation, run_scout, run_scout_resuming};
pub use walk::{OnBlocked, PageWalker, PhaseStats};

use crate::config::Config;
use crate::listing::ListingParser;
use crate::state::{CrawlState, FetchTarget};
use crate::HarvestError;
use indicatif::ProgressBar;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Everything the crawl phases share
#[derive(Clone)]
pub struct CrawlContext {
    pub state: Arc<CrawlState>,
    pub parser: Arc<dyn ListingParser>,

    /// Listing URL template with `{category}` and `{page}`
    pub listing_url: String,

    /// Referer sent with listing requests
    pub referer: String,

    /// Cap on pages walked per category
    pub max_pages: u32,

    /// Fetches in flight during scout and bulk
    pub concurrency: usize,

    /// Advanced once per listing page fetched, hidden unless shown by the CLI
    pub progress: ProgressBar,
}

impl CrawlContext {
    pub fn from_config(
        config: &Config,
        state: Arc<CrawlState>,
        parser: Arc<dyn ListingParser>,
    ) -> Self {
        Self {
            state,
            parser,
            listing_url: config.site.listing_url.clone(),
            referer: config.site.referer.clone(),
            max_pages: config.crawl.max_pages_per_category,
            concurrency: config.crawl.bulk_concurrency as usize,
            progress: ProgressBar::hidden(),
        }
    }

    /// Target for one page of one category
    pub fn target(&self, category: &str, page_number: u32) -> FetchTarget {
        FetchTarget::new(&self.listing_url, category, page_number, &self.referer)
    }
}

#[derive(Debug, Deserialize)]
struct CategoryInput {
    categories: Vec<String>,
}

/// Reads the category list from a discovery file
///
/// The file is JSON of the form `{"categories": ["slug", ...]}`; other
/// fields are ignored. Duplicates are dropped, first occurrence kept.
///
/// # Errors
///
/// Returns [`HarvestError::Input`] if the file cannot be read, is not valid
/// JSON, lists no categories, or contains a slug with characters other than
/// ASCII alphanumerics, `-` and `_`.
pub fn load_categories(path: &Path) -> crate::Result<Vec<String>> {
    let input_error = |message: String| HarvestError::Input {
        path: path.display().to_string(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| input_error(e.to_string()))?;
    let input: CategoryInput =
        serde_json::from_str(&content).map_err(|e| input_error(e.to_string()))?;

    let mut categories: Vec<String> = Vec::with_capacity(input.categories.len());
    for slug in input.categories {
        let slug = slug.trim().to_string();
        if slug.is_empty()
            || !slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(input_error(format!("invalid category slug {:?}", slug)));
        }
        if !categories.contains(&slug) {
            categories.push(slug);
        }
    }

    if categories.is_empty() {
        return Err(input_error("no categories listed".to_string()));
    }

    Ok(categories)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted channels and a plain-text listing format for orchestrator tests

    use crate::config::Config;
    use crate::fetch::{BrowserInstance, FailureKind, FetchChannel, FetchOutcome};
    use crate::listing::{ListingParser, ListingRecord};
    use crate::HarvestError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use url::Url;

    pub const TEMPLATE: &str = "https://d.test/{category}/?page={page}";

    /// Listing format: `pages=N;id,id,id`
    pub struct TextParser;

    impl ListingParser for TextParser {
        fn parse_listing(&self, document: &str, _page_url: &Url) -> Vec<ListingRecord> {
            let cards = document.split_once(';').map(|(_, c)| c).unwrap_or(document);
            cards
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| ListingRecord::new(id, format!("https://p.test/lawyer/{}.html", id)))
                .collect()
        }

        fn parse_page_count(&self, document: &str, _page_url: &Url) -> Option<u32> {
            document
                .split_once(';')
                .and_then(|(head, _)| head.strip_prefix("pages="))
                .and_then(|n| n.parse().ok())
        }
    }

    pub fn page(pages: Option<u32>, ids: &[String]) -> String {
        match pages {
            Some(n) => format!("pages={};{}", n, ids.join(",")),
            None => ids.join(","),
        }
    }

    pub fn ids(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("{}{:03}", prefix, i)).collect()
    }

    pub fn url(category: &str, page: u32) -> String {
        crate::url::listing_url(TEMPLATE, category, page)
    }

    /// Channel answering from a per-URL script; unscripted URLs are 404
    pub struct ScriptedChannel {
        name: String,
        script: Mutex<HashMap<String, FetchOutcome>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn serve(&self, url: String, body: String) {
            self.script
                .lock()
                .unwrap()
                .insert(url, FetchOutcome::success(body, 200));
        }

        pub fn block(&self, url: String) {
            self.script
                .lock()
                .unwrap()
                .insert(url, FetchOutcome::blocked(None, Some(403)));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl FetchChannel for ScriptedChannel {
        async fn fetch(&self, url: &str, _referer: Option<&str>) -> FetchOutcome {
            self.calls.lock().unwrap().push(url.to_string());
            let scripted = self.script.lock().unwrap().get(url).cloned();
            scripted
                .unwrap_or_else(|| {
                    FetchOutcome::failed(FailureKind::NotFound, Some(404), "HTTP 404")
                })
                .via(&self.name)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Browser instance answering through a scripted channel
    pub struct ScriptedBrowser {
        pub channel: Arc<ScriptedChannel>,
        pub refuse_start: bool,
        pub running: AtomicBool,
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
    }

    impl ScriptedBrowser {
        pub fn new(channel: Arc<ScriptedChannel>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                refuse_start: false,
                running: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }

        /// An instance whose start always fails
        pub fn refusing(channel: Arc<ScriptedChannel>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                refuse_start: true,
                running: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchChannel for ScriptedBrowser {
        async fn fetch(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
            assert!(self.running.load(Ordering::SeqCst), "fetch on stopped instance");
            self.channel.fetch(url, referer).await
        }

        fn name(&self) -> &str {
            "browser-0"
        }
    }

    #[async_trait]
    impl BrowserInstance for ScriptedBrowser {
        async fn start(&self) -> crate::Result<()> {
            if self.refuse_start {
                return Err(HarvestError::Browser {
                    endpoint: "scripted".to_string(),
                    message: "refused".to_string(),
                });
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }

        fn capacity(&self) -> usize {
            2
        }
    }

    /// Minimal config over [`TEMPLATE`] with zero delays
    pub fn test_config(data_dir: &Path, max_results: Option<usize>) -> Config {
        let max_results = max_results
            .map(|n| format!("max-results = {}\n", n))
            .unwrap_or_default();
        let toml = format!(
            r#"
[site]
listing-url = "{template}"
referer = "https://d.test/"
detail-referer = "https://d.test/"

[light]
max-concurrent = 4
delay-min-ms = 0
delay-max-ms = 0

[browser]
endpoints = ["http://127.0.0.1:9"]
tabs = 2
delay-min-ms = 0
delay-max-ms = 0

[crawl]
bulk-concurrency = 4
{max_results}
[output]
data-dir = "{data_dir}"
"#,
            template = TEMPLATE,
            max_results = max_results,
            data_dir = data_dir.display()
        );
        toml::from_str(&toml).unwrap()
    }
}
