//! Fetch channels and the browser pool
//!
//! This module contains everything that touches the network:
//! - [`FetchOutcome`] classification of every response into success,
//!   blocked (bot challenge) or failed
//! - Jittered pre-request delays and exponential backoff for transient failures
//! - [`HttpChannel`]: the lightweight channel (plain HTTP, high concurrency)
//! - [`BrowserChannel`]: the heavyweight channel (headless browser instance)
//! - [`FetchPool`]: round-robin distribution over browser instances
//!
//! Orchestrators only ever see the [`FetchChannel`] trait, so the same code
//! path drives either channel.

mod browser;
mod classify;
mod http;
mod outcome;
mod pacing;
mod pool;

pub use browser::BrowserChannel;
pub use classify::{classify_response, is_challenge, CHALLENGE_MARKERS, MITIGATION_HEADER};
pub use http::{build_http_client, HttpChannel};
pub use outcome::{FailureKind, FetchOutcome, FetchStatus};
pub use pacing::{DelayRange, RetryPolicy};
pub use pool::FetchPool;

use async_trait::async_trait;

/// A single way of fetching a URL
///
/// Implementations apply their own delay, concurrency bound and retry
/// policy. A `Blocked` outcome is returned as-is, never retried on the same
/// channel, so the caller can escalate.
#[async_trait]
pub trait FetchChannel: Send + Sync {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> FetchOutcome;

    /// Short name used in logs and outcome metadata
    fn name(&self) -> &str;
}

/// A heavyweight channel backed by an expensive external resource
///
/// Instances must be started before fetching and stopped afterwards;
/// [`FetchPool::run`] guarantees the pairing.
#[async_trait]
pub trait BrowserInstance: FetchChannel {
    async fn start(&self) -> crate::Result<()>;

    async fn stop(&self);

    /// Maximum concurrent pages ("tabs") on this instance
    fn capacity(&self) -> usize;
}
