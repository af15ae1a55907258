//! Heavyweight channel: one headless-browser instance
//!
//! Each instance is a Browserless-compatible rendering service reached over
//! HTTP. Pages are loaded with `POST {endpoint}/content`, which navigates a
//! real browser, waits for network idle plus a settle period, and returns
//! the rendered HTML. The instance keeps a persistent profile directory so
//! clearance cookies survive across pages.

use crate::config::{parse_viewport, BrowserConfig, RetryConfig};
use crate::fetch::{
    classify_response, BrowserInstance, DelayRange, FailureKind, FetchChannel, FetchOutcome,
    RetryPolicy,
};
use crate::HarvestError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Header the rendering service uses to report the page's own HTTP status
const PAGE_STATUS_HEADER: &str = "x-response-code";

/// One browser instance with a bounded number of concurrent tabs
pub struct BrowserChannel {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: Client,
    tabs: Semaphore,
    capacity: usize,
    delay: DelayRange,
    retry: RetryPolicy,
    settle_ms: u64,
    timeout: Duration,
    user_agent: String,
    viewport: (u32, u32),
    profile_dir: PathBuf,
    proxy: Option<String>,
    running: AtomicBool,
}

impl BrowserChannel {
    /// Creates the channel for the instance at `endpoint`
    ///
    /// # Arguments
    ///
    /// * `config` - Browser channel configuration shared by all instances
    /// * `retry` - Retry policy for transient failures
    /// * `index` - Position of this instance in the pool
    /// * `endpoint` - Base URL of the rendering service
    ///
    /// # Returns
    ///
    /// * `Ok(BrowserChannel)` - A stopped instance, ready to be started
    /// * `Err(HarvestError)` - Invalid viewport or HTTP client failure
    pub fn new(
        config: &BrowserConfig,
        retry: &RetryConfig,
        index: usize,
        endpoint: &str,
    ) -> crate::Result<Self> {
        let viewport = parse_viewport(&config.viewport)?;
        let timeout = Duration::from_secs(config.timeout_secs);

        // The service call outlives the page load by the settle period
        let client = Client::builder()
            .timeout(timeout + Duration::from_millis(config.settle_ms) + Duration::from_secs(10))
            .build()?;

        let capacity = config.tabs.max(1) as usize;

        Ok(Self {
            name: format!("browser-{}", index),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
            tabs: Semaphore::new(capacity),
            capacity,
            delay: DelayRange::new(config.delay_min_ms, config.delay_max_ms),
            retry: RetryPolicy::from(retry),
            settle_ms: config.settle_ms,
            timeout,
            user_agent: config.user_agent.clone(),
            viewport,
            profile_dir: PathBuf::from(&config.profile_dir).join(format!("instance-{}", index)),
            proxy: config.proxy.clone(),
            running: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch options passed to the service on every page load
    fn launch_options(&self) -> serde_json::Value {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--window-size={},{}", self.viewport.0, self.viewport.1),
        ];
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy));
        }

        json!({
            "headless": true,
            "stealth": true,
            "args": args,
            "userDataDir": self.profile_dir.to_string_lossy(),
        })
    }

    fn content_request(&self, url: &str, referer: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": self.timeout.as_millis() as u64,
            },
            "waitForTimeout": self.settle_ms,
            "userAgent": self.user_agent,
            "viewport": {
                "width": self.viewport.0,
                "height": self.viewport.1,
            },
        });

        if let Some(referer) = referer {
            body["setExtraHTTPHeaders"] = json!({ "Referer": referer });
        }

        body
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(2);
        if let Some(token) = &self.token {
            query.push(("token", token.clone()));
        }
        query.push(("launch", self.launch_options().to_string()));
        query
    }

    /// One delayed, tab-bounded page load
    async fn attempt(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
        if !self.is_running() {
            return FetchOutcome::failed(
                FailureKind::Unavailable,
                None,
                format!("{} is not running", self.name),
            );
        }

        self.delay.wait().await;

        let Ok(_tab) = self.tabs.acquire().await else {
            return FetchOutcome::failed(FailureKind::Unavailable, None, "instance closed");
        };

        tracing::debug!("{} rendering {}", self.name, url);

        let response = match self
            .client
            .post(format!("{}/content", self.endpoint))
            .query(&self.query())
            .json(&self.content_request(url, referer))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return FetchOutcome::failed(FailureKind::Transient, None, "Render timeout")
            }
            Err(e) => {
                return FetchOutcome::failed(
                    FailureKind::Transient,
                    None,
                    format!("Rendering service error: {}", e),
                )
            }
        };

        let service_status = response.status();
        if !service_status.is_success() {
            let code = service_status.as_u16();
            let kind = if code == 429 || service_status.is_server_error() {
                FailureKind::Transient
            } else {
                FailureKind::Rejected
            };
            return FetchOutcome::failed(
                kind,
                None,
                format!("Rendering service returned HTTP {}", code),
            );
        }

        let page_status = response
            .headers()
            .get(PAGE_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u16>().ok())
            .unwrap_or(200);

        match response.text().await {
            Ok(body) => classify_response(page_status, false, body),
            Err(e) => FetchOutcome::failed(
                FailureKind::Transient,
                Some(page_status),
                format!("Failed to read rendered page: {}", e),
            ),
        }
    }
}

#[async_trait]
impl FetchChannel for BrowserChannel {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
        let outcome = self
            .retry
            .run(url, move || self.attempt(url, referer))
            .await
            .via(&self.name);

        if outcome.is_blocked() {
            tracing::warn!("Challenge persisted for {} ({})", url, self.name);
        }

        outcome
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl BrowserInstance for BrowserChannel {
    async fn start(&self) -> crate::Result<()> {
        tokio::fs::create_dir_all(&self.profile_dir).await?;

        let mut request = self.client.get(format!("{}/json/version", self.endpoint));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }

        let response = request.send().await.map_err(|e| HarvestError::Browser {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(HarvestError::Browser {
                endpoint: self.endpoint.clone(),
                message: format!("health check returned HTTP {}", response.status().as_u16()),
            });
        }

        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Started {} at {} ({} tabs, profile {})",
            self.name,
            self.endpoint,
            self.capacity,
            self.profile_dir.display()
        );
        Ok(())
    }

    async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopped {}", self.name);
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
