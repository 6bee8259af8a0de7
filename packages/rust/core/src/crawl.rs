//! Crawl stage: listing → dedup → bounded pool → `data.json` + ledger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, instrument};

use threadvault_crawler::{
    Enumerator, ForumClient, RetryPolicy, SiteAdapter, fetch_detail, localize_images,
};
use threadvault_shared::{
    BatchOutcome, CrawlConfig, RawArticle, ReportingConfig, Result, ThreadvaultError, WorkItem,
    require_secret,
};
use threadvault_storage::{Ledger, LedgerTable};

use crate::commit::{CommitStatus, commit_artifact};
use crate::dedup::{self, DedupCounts};
use crate::layout::{DATA_FILE, IMAGES_DIR, RawLayout};
use crate::notify::Notifier;
use crate::pool::WorkerPool;
use crate::progress::{FinalSummary, StageProgress, collect_outcomes};
use crate::{finish_run, start_run};

const STAGE: &str = "crawl";

/// Result of a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub dedup: DedupCounts,
    pub summary: FinalSummary,
}

/// Everything a worker needs, shared read-only across the pool.
struct CrawlContext {
    client: ForumClient,
    adapter: Arc<dyn SiteAdapter>,
    ledger: Arc<Ledger>,
    layout: RawLayout,
    /// Output date folder, fixed for the whole run.
    date: String,
    policy: RetryPolicy,
    detail_timeout: Duration,
    asset_timeout: Duration,
    unknown_author: String,
}

/// Run one crawl of the configured forum.
///
/// Startup failures (unreadable ledger, unreachable first listing page) are
/// returned as errors after a notification. Per-item failures only show up
/// in the summary.
#[instrument(skip_all, fields(forum = %config.forum_id, concurrency = config.concurrency))]
pub async fn run_crawl(
    config: &CrawlConfig,
    reporting: &ReportingConfig,
    adapter: Arc<dyn SiteAdapter>,
    ledger: Arc<Ledger>,
    notifier: &Notifier,
    progress: &dyn StageProgress,
) -> Result<CrawlReport> {
    let started = Instant::now();
    notifier
        .send(
            "threadvault crawl started",
            &format!(
                "forum {} with {} workers, batch size {}",
                config.forum_id, config.concurrency, reporting.batch_size
            ),
        )
        .await;
    let run_id = start_run(&ledger, STAGE).await;

    let scraped = match ledger.list_all(LedgerTable::Scraped).await {
        Ok(set) => set,
        Err(e) => return Err(abort(notifier, "ledger unreadable", e).await),
    };
    let layout = RawLayout::new(&config.raw_dir);
    let on_disk = match layout.scan_materialized() {
        Ok(set) => set,
        Err(e) => return Err(abort(notifier, "raw tree unreadable", e).await),
    };
    info!(in_ledger = scraped.len(), on_disk = on_disk.len(), "completion state loaded");

    progress.phase("listing");
    let client = match ForumClient::new(config) {
        Ok(client) => client,
        Err(e) => return Err(abort(notifier, "cannot build HTTP session", e).await),
    };
    let enumerator = match Enumerator::open(&client, adapter.as_ref(), config).await {
        Ok(enumerator) => enumerator,
        Err(e) => return Err(abort(notifier, "listing unreachable", e).await),
    };
    let candidates = enumerator.collect_all().await;

    let filtered = dedup::filter(
        candidates,
        |item: &WorkItem| item.id.as_str().to_string(),
        &scraped,
        &on_disk,
    );
    let mut counts = filtered.counts;
    counts.reconciled = dedup::reconcile(&ledger, LedgerTable::Scraped, &filtered.reconcile).await;
    info!(
        discovered = counts.discovered,
        admitted = counts.admitted,
        in_ledger = counts.in_ledger,
        on_disk = counts.on_disk,
        reconciled = counts.reconciled,
        duplicates = counts.duplicates,
        "work set ready"
    );

    if filtered.admitted.is_empty() {
        notifier
            .send(
                "threadvault crawl: nothing new",
                &format!("{} threads listed, all already collected", counts.discovered),
            )
            .await;
        let summary = FinalSummary::empty(started.elapsed());
        progress.done(&summary);
        finish_run(&ledger, run_id, json!({ "dedup": counts, "summary": summary })).await;
        return Ok(CrawlReport {
            dedup: counts,
            summary,
        });
    }

    let ctx = Arc::new(CrawlContext {
        client,
        adapter,
        ledger: ledger.clone(),
        layout,
        date: Local::now().format("%Y-%m-%d").to_string(),
        policy: RetryPolicy::from_config(config),
        detail_timeout: config.detail_timeout,
        asset_timeout: config.asset_timeout,
        unknown_author: config.unknown_author.clone(),
    });

    progress.phase("fetching");
    progress.started(filtered.admitted.len());
    let stream = WorkerPool::new(config.concurrency).spawn(filtered.admitted, move |item| {
        let ctx = ctx.clone();
        async move { process_item(&ctx, item).await }
    });
    let summary = collect_outcomes(
        stream,
        reporting.batch_size,
        STAGE,
        notifier,
        progress,
        started,
    )
    .await;

    notifier.send("threadvault crawl finished", &summary.to_string()).await;
    progress.done(&summary);
    finish_run(&ledger, run_id, json!({ "dedup": counts, "summary": summary })).await;

    Ok(CrawlReport {
        dedup: counts,
        summary,
    })
}

async fn abort(notifier: &Notifier, what: &str, e: ThreadvaultError) -> ThreadvaultError {
    error!(error = %e, "{what}");
    notifier
        .send(&format!("threadvault crawl aborted: {what}"), &e.to_string())
        .await;
    e
}

/// Forum session cookie from `var`. A missing cookie is announced through
/// `notifier` before the error is returned.
pub async fn session_cookie(var: &str, notifier: &Notifier) -> Result<String> {
    match require_secret(var, "forum session cookie") {
        Ok(cookie) => Ok(cookie),
        Err(e) => Err(abort(notifier, &format!("{var} 未配置"), e).await),
    }
}

async fn process_item(ctx: &CrawlContext, item: WorkItem) -> BatchOutcome {
    match materialize(ctx, &item).await {
        Ok(outcome) => outcome,
        Err(e) => BatchOutcome::error(item.title, e.to_string()),
    }
}

/// Fetch, localize, and commit one thread.
async fn materialize(ctx: &CrawlContext, item: &WorkItem) -> Result<BatchOutcome> {
    let detail = fetch_detail(
        &ctx.client,
        ctx.adapter.as_ref(),
        &item.detail_url,
        ctx.detail_timeout,
        &ctx.policy,
    )
    .await?;

    let dir = ctx.layout.item_dir(&ctx.date, &item.id);
    std::fs::create_dir_all(&dir).map_err(|e| ThreadvaultError::io(&dir, e))?;

    let localized = localize_images(
        &ctx.client,
        &detail.content_html,
        &dir.join(IMAGES_DIR),
        ctx.asset_timeout,
    )
    .await?;

    let now = Local::now();
    let article = RawArticle {
        original_title: item.title.clone(),
        source_url: item.detail_url.to_string(),
        author: detail
            .author
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| ctx.unknown_author.clone()),
        publish_date: detail
            .posted_at
            .unwrap_or_else(|| now.format("%Y-%m-%d %H:%M").to_string()),
        scrape_date_utc: Utc::now().to_rfc3339(),
        cover_image_url: detail.cover_url,
        content_html: localized.html.clone(),
        hexo_date: hexo_date(item.posted_at.as_deref(), now),
    };
    let json = serde_json::to_vec_pretty(&article)
        .map_err(|e| ThreadvaultError::validation(format!("cannot serialize article: {e}")))?;

    let status = commit_artifact(
        &ctx.ledger,
        LedgerTable::Scraped,
        item.id.as_str(),
        &dir.join(DATA_FILE),
        &json,
    )
    .await?;
    if let CommitStatus::LedgerWriteFailed(reason) = &status {
        debug!(id = %item.id, reason, "artifact kept, ledger will be reconciled");
    }

    if localized.is_complete() {
        return Ok(BatchOutcome::success(&item.title));
    }
    let attempted = localized.saved.len() + localized.failures.len();
    let first = &localized.failures[0];
    Ok(BatchOutcome::partial(
        &item.title,
        format!(
            "{} of {} images failed, first {}: {}",
            localized.failures.len(),
            attempted,
            first.url,
            first.reason
        ),
    ))
}

/// Hexo `date` from the listing timestamp, else the crawl time.
fn hexo_date(listing_date: Option<&str>, now: DateTime<Local>) -> String {
    listing_date
        .and_then(|raw| NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M").ok())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| now.format("%Y-%m-%d %H:%M:00").to_string())
}
