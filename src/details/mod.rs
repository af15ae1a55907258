//! Detail-fetch pipeline
//!
//! Downloads one raw detail document per record in `listings.json`:
//! - Documents already on disk are skipped unless forced (or, in
//!   retry-blocked mode, unless they hold a bot challenge)
//! - Phase 1 sweeps everything through the light channel
//! - Phase 2 retries blocked records through the browser pool in batches
//!
//! `fetch_status.json` records the latest status of every identifier and is
//! rewritten after each batch.

mod pipeline;
mod status;

pub use pipeline::{run_details, DetailOptions, DetailPipeline, DetailSummary};
pub use status::{read_status_counts, DetailStatus, StatusCounts, StatusLog};
