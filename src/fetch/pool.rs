//! Round-robin pool of heavyweight browser instances

use crate::config::{BrowserConfig, RetryConfig};
use crate::fetch::{BrowserChannel, BrowserInstance, FailureKind, FetchChannel, FetchOutcome};
use crate::HarvestError;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed set of browser instances used as one channel
///
/// Total concurrency is the sum of instance capacities. Requests are
/// handed to instances in turn; each instance enforces its own tab limit.
pub struct FetchPool {
    instances: Vec<Arc<dyn BrowserInstance>>,
    cursor: AtomicUsize,
}

impl FetchPool {
    pub fn new(instances: Vec<Arc<dyn BrowserInstance>>) -> crate::Result<Self> {
        if instances.is_empty() {
            return Err(HarvestError::Pool(
                "pool needs at least one instance".to_string(),
            ));
        }
        Ok(Self {
            instances,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Builds one [`BrowserChannel`] per configured endpoint
    pub fn from_config(config: &BrowserConfig, retry: &RetryConfig) -> crate::Result<Self> {
        let instances = config
            .endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                BrowserChannel::new(config, retry, index, endpoint)
                    .map(|channel| Arc::new(channel) as Arc<dyn BrowserInstance>)
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Self::new(instances)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Sum of tab capacities across all instances
    pub fn total_concurrency(&self) -> usize {
        self.instances.iter().map(|i| i.capacity()).sum()
    }

    /// Starts every instance
    ///
    /// If any instance fails to start, the ones already started are stopped
    /// again and the error is returned.
    pub async fn start(&self) -> crate::Result<()> {
        for (started, instance) in self.instances.iter().enumerate() {
            if let Err(e) = instance.start().await {
                tracing::error!("Failed to start {}: {}", instance.name(), e);
                for running in &self.instances[..started] {
                    running.stop().await;
                }
                return Err(e);
            }
        }

        tracing::info!(
            "Fetch pool ready: {} instance(s), {} concurrent pages",
            self.len(),
            self.total_concurrency()
        );
        Ok(())
    }

    pub async fn stop(&self) {
        for instance in &self.instances {
            instance.stop().await;
        }
    }

    /// Runs `body` with the pool started, stopping it on every exit path
    ///
    /// The pool is stopped after `body` returns, including when it panics;
    /// the panic is resumed once the instances are down.
    pub async fn run<F, Fut, T>(self: Arc<Self>, body: F) -> crate::Result<T>
    where
        F: FnOnce(Arc<FetchPool>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await?;

        let result = AssertUnwindSafe(body(Arc::clone(&self)))
            .catch_unwind()
            .await;

        self.stop().await;

        match result {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn next_instance(&self) -> &Arc<dyn BrowserInstance> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        &self.instances[index]
    }
}

#[async_trait]
impl FetchChannel for FetchPool {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> FetchOutcome {
        if self.instances.is_empty() {
            return FetchOutcome::failed(FailureKind::Unavailable, None, "empty pool").via("pool");
        }
        self.next_instance().fetch(url, referer).await
    }

    fn name(&self) -> &str {
        "pool"
    }
}
