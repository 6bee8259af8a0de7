//! Stage orchestration for threadvault.
//!
//! This crate ties the forum crawler, the Markdown renderer and the ledger
//! into the three resumable stages: [`crawl::run_crawl`],
//! [`optimize::run_optimize`] and [`refine::run_refine`]. Each stage admits
//! only work the ledger (or the output tree) does not already hold, runs it
//! with bounded concurrency, and reports progress in fixed-size batches.

pub mod commit;
pub mod crawl;
pub mod dedup;
pub mod enrichment;
pub mod layout;
pub mod notify;
pub mod optimize;
pub mod pool;
pub mod progress;
pub mod refine;

use tracing::warn;

use threadvault_storage::Ledger;

pub use crawl::{CrawlReport, run_crawl, session_cookie};
pub use enrichment::{GeminiClient, MetadataService};
pub use notify::Notifier;
pub use optimize::{OptimizeReport, run_optimize};
pub use progress::{FinalSummary, SilentProgress, StageProgress};
pub use refine::{RefineReport, run_refine};

/// Open a run record. A failure only costs the history entry.
pub async fn start_run(ledger: &Ledger, stage: &str) -> Option<String> {
    match ledger.start_run(stage).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(stage, error = %e, "could not record run start");
            None
        }
    }
}

/// Close a run record with its stats.
pub async fn finish_run(ledger: &Ledger, run_id: Option<String>, stats: serde_json::Value) {
    let Some(run_id) = run_id else {
        return;
    };
    if let Err(e) = ledger.finish_run(&run_id, &stats.to_string()).await {
        warn!(run_id, error = %e, "could not record run end");
    }
}
