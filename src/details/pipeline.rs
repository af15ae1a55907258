use crate::config::Config;
use crate::details::{DetailStatus, StatusLog};
use crate::fetch::{is_challenge, FetchChannel, FetchOutcome, FetchPool, FetchStatus, HttpChannel};
use crate::storage::{read_json, write_atomic, DataLayout, RecordMap};
use crate::output::progress_bar;
use crate::HarvestError;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Runtime switches for one detail run
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailOptions {
    /// Re-download documents that already exist
    pub force: bool,

    /// Re-download only existing documents that hold a bot challenge
    pub retry_blocked: bool,
}

/// Counters for one detail run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetailSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Records blocked on the light channel and handed to the pool
    pub escalated: usize,
}

impl DetailSummary {
    /// Identifiers that needed network work this run
    pub fn fetched(&self) -> usize {
        self.success + self.failed
    }

    pub fn log(&self) {
        tracing::info!(
            "Detail fetch complete: {} success, {} failed, {} skipped ({} escalated)",
            self.success,
            self.failed,
            self.skipped,
            self.escalated
        );
    }
}

/// One record waiting for its document
#[derive(Debug, Clone)]
struct DetailJob {
    identifier: String,
    url: String,
}

/// Fetches detail documents for every merged listing record
pub struct DetailPipeline {
    layout: DataLayout,
    light: Arc<dyn FetchChannel>,
    pool: Arc<FetchPool>,
    referer: String,
    concurrency: usize,
    batch_size: usize,
    progress: ProgressBar,
}

impl DetailPipeline {
    /// Creates a pipeline with the channels described by `config`
    pub fn new(config: &Config) -> crate::Result<Self> {
        let light = Arc::new(HttpChannel::new(&config.light, &config.retry)?);
        let pool = Arc::new(FetchPool::from_config(&config.browser, &config.retry)?);
        Ok(Self::with_channels(config, light, pool))
    }

    /// Creates a pipeline around existing channels
    pub fn with_channels(
        config: &Config,
        light: Arc<dyn FetchChannel>,
        pool: Arc<FetchPool>,
    ) -> Self {
        // 0 keeps every pool tab busy
        let batch_size = match config.details.batch_size {
            0 => pool.total_concurrency(),
            n => n as usize,
        };

        Self {
            layout: DataLayout::new(&config.output.data_dir),
            light,
            pool,
            referer: config.site.detail_referer.clone(),
            concurrency: config.light.max_concurrent.max(1) as usize,
            batch_size: batch_size.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    /// Draws a bar of records settled on stderr when `visible`
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.progress = progress_bar("records", visible);
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Runs both phases over `listings.json`
    ///
    /// The browser pool is only started when the light channel leaves
    /// blocked records behind.
    ///
    /// # Errors
    ///
    /// Fails if `listings.json` is missing or unreadable, or if the status
    /// file cannot be written. Per-record failures, including a document
    /// that cannot be written, are counted, never returned.
    pub async fn run(&self, options: DetailOptions) -> crate::Result<DetailSummary> {
        self.layout.ensure()?;
        let listings = self.load_listings()?;
        let mut log = StatusLog::load(self.layout.fetch_status_path());
        let mut summary = DetailSummary::default();

        let mut queue = Vec::new();
        for (identifier, record) in &listings {
            if record.detail_url.trim().is_empty() {
                tracing::warn!("No detail URL for {}", identifier);
                log.record(identifier.clone(), DetailStatus::Failed);
                summary.failed += 1;
                continue;
            }

            let doc_path = self.layout.doc_path(identifier);
            if !options.force && doc_path.exists() {
                if options.retry_blocked && holds_challenge(&doc_path) {
                    tracing::debug!("Re-queueing challenge document for {}", identifier);
                } else {
                    log.record(identifier.clone(), DetailStatus::Skipped);
                    summary.skipped += 1;
                    continue;
                }
            }

            queue.push(DetailJob {
                identifier: identifier.clone(),
                url: record.detail_url.clone(),
            });
        }

        tracing::info!(
            "Details to fetch: {} (skipping {} already on disk)",
            queue.len(),
            summary.skipped
        );

        self.progress.inc_length(queue.len() as u64);
        let blocked = self.sweep(queue, &mut log, &mut summary).await;
        log.save()?;

        if !blocked.is_empty() {
            summary.escalated = blocked.len();
            tracing::info!("Escalating {} blocked records to the pool", blocked.len());

            let pool = Arc::clone(&self.pool);
            let log = &mut log;
            let summary = &mut summary;
            pool.run(|pool| async move { self.mop_up(pool.as_ref(), blocked, log, summary).await })
                .await??;
        }

        self.progress.finish();
        summary.log();
        Ok(summary)
    }

    fn load_listings(&self) -> crate::Result<RecordMap> {
        let path = self.layout.listings_path();
        if !path.exists() {
            return Err(HarvestError::Input {
                path: path.display().to_string(),
                message: "no merged listings; run the crawl first".to_string(),
            });
        }
        Ok(read_json(&path)?)
    }

    /// Phase 1: every queued record through the light channel
    ///
    /// # Returns
    ///
    /// The records that came back blocked, to be retried on the pool
    async fn sweep(
        &self,
        queue: Vec<DetailJob>,
        log: &mut StatusLog,
        summary: &mut DetailSummary,
    ) -> Vec<DetailJob> {
        let light = self.light.as_ref();
        let referer = self.referer.as_str();
        let mut blocked = Vec::new();

        let mut results = stream::iter(queue)
            .map(|job| async move {
                let outcome = light.fetch(&job.url, Some(referer)).await;
                (job, outcome)
            })
            .buffer_unordered(self.concurrency);

        while let Some((job, outcome)) = results.next().await {
            if outcome.is_blocked() {
                tracing::debug!("Blocked on {}: {}", light.name(), job.identifier);
                blocked.push(job);
                continue;
            }
            let status = self.settle(&job, outcome);
            log.record(job.identifier, status);
            count(summary, status);
            self.progress.inc(1);
        }

        blocked
    }

    /// Phase 2: blocked records through the pool, one batch at a time
    async fn mop_up(
        &self,
        pool: &FetchPool,
        blocked: Vec<DetailJob>,
        log: &mut StatusLog,
        summary: &mut DetailSummary,
    ) -> crate::Result<()> {
        let referer = self.referer.as_str();
        let batches = blocked.len().div_ceil(self.batch_size);

        for (index, batch) in blocked.chunks(self.batch_size).enumerate() {
            let outcomes: Vec<(&DetailJob, FetchOutcome)> = stream::iter(batch)
                .map(|job| async move { (job, pool.fetch(&job.url, Some(referer)).await) })
                .buffer_unordered(batch.len())
                .collect()
                .await;

            for (job, outcome) in outcomes {
                let status = self.settle(job, outcome);
                log.record(job.identifier.clone(), status);
                count(summary, status);
                self.progress.inc(1);
            }

            log.save()?;
            tracing::info!(
                "Pool batch {}/{} done ({} success, {} failed so far)",
                index + 1,
                batches,
                summary.success,
                summary.failed
            );
        }

        Ok(())
    }

    /// Writes the document of a successful fetch; anything else is a failure
    ///
    /// A document that cannot be written fails only its own record.
    fn settle(&self, job: &DetailJob, outcome: FetchOutcome) -> DetailStatus {
        let FetchOutcome {
            status,
            body,
            message,
            channel,
            ..
        } = outcome;

        match body {
            Some(body) if status == FetchStatus::Success => {
                let path = self.layout.doc_path(&job.identifier);
                match write_atomic(&path, body.as_bytes()) {
                    Ok(()) => DetailStatus::Success,
                    Err(e) => {
                        tracing::error!("Failed to save detail for {}: {}", job.identifier, e);
                        DetailStatus::Failed
                    }
                }
            }
            _ => {
                tracing::warn!(
                    "Failed to fetch detail for {} via {} ({})",
                    job.identifier,
                    channel,
                    message.unwrap_or_else(|| status.to_string())
                );
                DetailStatus::Failed
            }
        }
    }
}

fn count(summary: &mut DetailSummary, status: DetailStatus) {
    match status {
        DetailStatus::Success => summary.success += 1,
        DetailStatus::Failed => summary.failed += 1,
        DetailStatus::Skipped => summary.skipped += 1,
    }
}

/// True for a challenge document; an unreadable one is fetched again too
fn holds_challenge(path: &Path) -> bool {
    match std::fs::read(path) {
        Ok(bytes) => is_challenge(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            true
        }
    }
}

/// Runs the detail pipeline for the data directory in `config`
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `options` - Runtime switches
///
/// # Returns
///
/// * `Ok(DetailSummary)` - Counts of fetched, failed and skipped records
/// * `Err(HarvestError)` - Listings missing or data directory unwritable
pub async fn run_details(config: &Config, options: DetailOptions) -> crate::Result<DetailSummary> {
    let pipeline = DetailPipeline::new(config)?;
    pipeline.run(options).await
}
