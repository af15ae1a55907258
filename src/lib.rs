//! Directory-Harvest: crawl orchestration for hostile directory sites
//!
//! This crate harvests a deduplicated set of listing records from a paginated
//! directory site that rate-limits and serves bot-challenge pages. It scouts
//! every category, bulk-fetches the remaining pages through a cheap HTTP
//! channel, mops up blocked pages through a pool of headless-browser
//! instances, and checkpoints each category so interrupted runs resume.
//! A companion pipeline downloads one detail document per discovered record.

pub mod config;
pub mod crawler;
pub mod details;
pub mod fetch;
pub mod listing;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Directory-Harvest operations
///
/// Per-page and per-record fetch failures are never errors; they are
/// recorded as [`fetch::FetchOutcome`] values. Only conditions that make the
/// whole run meaningless surface here.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input {path}: {message}")]
    Input { path: String, message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Browser instance {endpoint} unavailable: {message}")]
    Browser { endpoint: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch pool error: {0}")]
    Pool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Directory-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetch::{FetchChannel, FetchOutcome, FetchPool, FetchStatus};
pub use listing::ListingRecord;
pub use state::{CategoryPlan, CrawlState, FetchTarget};
