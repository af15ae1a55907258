//! Lightweight HTTP channel
//!
//! Plain requests with a realistic browser header set, an optional proxy,
//! and no script execution. Cheap enough to run dozens of requests at once;
//! anything the edge challenges comes back `Blocked` for escalation.

use crate::config::{LightConfig, RetryConfig};
use crate::fetch::{
    classify_response, DelayRange, FailureKind, FetchChannel, FetchOutcome, RetryPolicy,
    MITIGATION_HEADER,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, Proxy};
use std::time::Duration;
use tokio::sync::Semaphore;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Builds the HTTP client used by the lightweight channel
///
/// # Arguments
///
/// * `config` - The lightweight channel configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy or TLS backend failure
pub fn build_http_client(config: &LightConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// The lightweight fetch channel
pub struct HttpChannel {
    client: Client,
    semaphore: Semaphore,
    max_concurrent: usize,
    delay: DelayRange,
    retry: RetryPolicy,
}

impl HttpChannel {
    /// Creates the channel from configuration
    pub fn new(config: &LightConfig, retry: &RetryConfig) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        Ok(Self::with_client(
            client,
            config.max_concurrent as usize,
            DelayRange::new(config.delay_min_ms, config.delay_max_ms),
            RetryPolicy::from(retry),
        ))
    }

    /// Creates the channel around an existing client
    pub fn with_client(
        client: Client,
        max_concurrent: usize,
        delay: DelayRange,
        retry: RetryPolicy,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            client,
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            delay,
            retry,
        }
    }

    /// Maximum number of requests in flight
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// One delayed, permit-bounded request
    async fn attempt(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
        // Sleep first so idle workers never hold a slot
        self.delay.wait().await;

        let Ok(_permit) = self.semaphore.acquire().await else {
            return FetchOutcome::failed(FailureKind::Unavailable, None, "channel closed");
        };

        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status().as_u16();
        let mitigated = response
            .headers()
            .get(MITIGATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("challenge"))
            .unwrap_or(false);

        match response.text().await {
            Ok(body) => classify_response(status, mitigated, body),
            Err(e) => FetchOutcome::failed(
                FailureKind::Transient,
                Some(status),
                format!("Failed to read body: {}", e),
            ),
        }
    }
}

#[async_trait]
impl FetchChannel for HttpChannel {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
        let outcome = self
            .retry
            .run(url, move || self.attempt(url, referer))
            .await
            .via(self.name());

        if outcome.is_blocked() {
            tracing::warn!("Challenge served for {} (light)", url);
        }

        outcome
    }

    fn name(&self) -> &str {
        "light"
    }
}

/// Maps a reqwest transport error onto the failure taxonomy
fn classify_transport_error(e: &reqwest::Error) -> FetchOutcome {
    if e.is_builder() {
        FetchOutcome::failed(FailureKind::Rejected, None, format!("Invalid request: {}", e))
    } else if e.is_timeout() {
        FetchOutcome::failed(FailureKind::Transient, None, "Request timeout")
    } else if e.is_connect() {
        FetchOutcome::failed(FailureKind::Transient, None, "Connection refused")
    } else {
        FetchOutcome::failed(FailureKind::Transient, None, e.to_string())
    }
}
