use serde::Deserialize;

/// Main configuration structure for Directory-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    pub light: LightConfig,
    pub browser: BrowserConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub details: DetailsConfig,
    pub output: OutputConfig,
}

/// Target site description
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Listing page URL template containing `{category}` and `{page}`
    #[serde(rename = "listing-url")]
    pub listing_url: String,

    /// Referer sent with listing page requests
    pub referer: String,

    /// Referer sent with detail page requests
    #[serde(rename = "detail-referer")]
    pub detail_referer: String,

    /// Only card links containing this path fragment are treated as records
    #[serde(rename = "detail-path-marker", default = "default_detail_path_marker")]
    pub detail_path_marker: String,
}

/// Lightweight (plain HTTP) channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LightConfig {
    /// Maximum number of requests in flight
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: u32,

    /// Lower bound of the jittered pre-request delay (milliseconds)
    #[serde(rename = "delay-min-ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the jittered pre-request delay (milliseconds)
    #[serde(rename = "delay-max-ms")]
    pub delay_max_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional proxy endpoint
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Heavyweight (headless browser) channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Rendering service endpoints, one per browser instance
    pub endpoints: Vec<String>,

    /// Concurrent pages per instance
    pub tabs: u32,

    #[serde(rename = "delay-min-ms")]
    pub delay_min_ms: u64,

    #[serde(rename = "delay-max-ms")]
    pub delay_max_ms: u64,

    /// Time to let the page settle after load (milliseconds)
    #[serde(rename = "settle-ms", default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(rename = "timeout-secs", default = "default_browser_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional API token for the rendering service
    #[serde(default)]
    pub token: Option<String>,

    /// Root directory for persisted per-instance browser profiles
    #[serde(rename = "profile-dir", default = "default_profile_dir")]
    pub profile_dir: String,

    /// Fixed user agent presented by every instance
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Fixed viewport as "width,height"
    #[serde(default = "default_viewport")]
    pub viewport: String,

    /// Optional proxy passed to the browser at launch
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Retry behavior for transient failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Backoff before retry n is `backoff_base_ms * 2^(n-1)`
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,
}

/// Listing crawl thresholds and limits
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// A category whose page-1 overlap ratio exceeds this is skipped
    #[serde(rename = "pa-skip-threshold", default = "default_pa_skip_threshold")]
    pub pa_skip_threshold: f64,

    /// A page whose new-identifier ratio falls below this stops its category
    #[serde(rename = "dedup-threshold", default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Global cap on harvested identifiers
    #[serde(rename = "max-results", default)]
    pub max_results: Option<usize>,

    /// Safety cap on pages walked per category
    #[serde(rename = "max-pages-per-category", default = "default_max_pages")]
    pub max_pages_per_category: u32,

    /// In-flight page fetches during the bulk phase
    #[serde(rename = "bulk-concurrency", default = "default_bulk_concurrency")]
    pub bulk_concurrency: u32,
}

/// Detail-fetch pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailsConfig {
    /// Fallback batch size; 0 means the pool's total concurrency
    #[serde(rename = "batch-size", default)]
    pub batch_size: u32,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding checkpoints, listings, documents and status files
    #[serde(rename = "data-dir")]
    pub data_dir: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            pa_skip_threshold: default_pa_skip_threshold(),
            dedup_threshold: default_dedup_threshold(),
            max_results: None,
            max_pages_per_category: default_max_pages(),
            bulk_concurrency: default_bulk_concurrency(),
        }
    }
}

impl BrowserConfig {
    /// Total concurrency across all browser instances
    pub fn total_concurrency(&self) -> usize {
        self.endpoints.len() * self.tabs as usize
    }
}

fn default_detail_path_marker() -> String {
    "/lawyer/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_browser_timeout_secs() -> u64 {
    60
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_profile_dir() -> String {
    "./browser-profile".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_viewport() -> String {
    "1366,768".to_string()
}

fn default_pa_skip_threshold() -> f64 {
    0.80
}

fn default_dedup_threshold() -> f64 {
    0.10
}

fn default_max_pages() -> u32 {
    200
}

fn default_bulk_concurrency() -> u32 {
    30
}
