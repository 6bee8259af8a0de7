//! Optimize stage: raw `data.json` folders → Hexo posts.
//!
//! Every raw folder becomes two files under the articles root: a remote
//! variant at `{date}/{name}.md`, and a local variant at
//! `{date}_local/{name}.md` whose images are copied next to it and referenced
//! with `asset_img` tags. Folders already listed in the `processed` ledger
//! table are skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, instrument, warn};
use url::Url;

use threadvault_markdown::{
    DESCRIPTION_LIMIT, FrontMatter, HexoPost, SEO_TITLE_LIMIT, StructuredData, TagRules,
    add_alt_tags, create_meta_description, create_seo_title, extract_tags_from_title,
    html_to_markdown, localize_image_tags, merge_tags, metadata_snippet, render_post,
};
use threadvault_shared::{
    BatchOutcome, MetadataSource, OptimizeConfig, RawArticle, ReportingConfig, Result,
    ThreadvaultError, sanitize_filename,
};
use threadvault_storage::{Ledger, LedgerTable};

use crate::commit::{record_completion, write_atomic};
use crate::dedup::{self, DedupCounts};
use crate::enrichment::MetadataService;
use crate::layout::{RawEntry, RawLayout};
use crate::notify::Notifier;
use crate::pool::WorkerPool;
use crate::progress::{FinalSummary, StageProgress, collect_outcomes};
use crate::{finish_run, start_run};

const STAGE: &str = "optimize";
/// Date folder suffix of the local-image variant.
const LOCAL_SUFFIX: &str = "_local";

#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub dedup: DedupCounts,
    pub summary: FinalSummary,
}

struct OptimizeContext {
    config: OptimizeConfig,
    ledger: Arc<Ledger>,
    metadata: Option<Arc<MetadataService>>,
    /// Post stems already taken, by earlier runs or by this one.
    stems: Mutex<HashSet<String>>,
}

impl OptimizeContext {
    fn rules(&self) -> TagRules<'_> {
        TagRules {
            extra_tags: &self.config.extra_tags,
            blacklist: &self.config.tag_blacklist,
            unknown_author: &self.config.unknown_author,
        }
    }

    /// Claim `name`; false if some post already uses it.
    fn reserve(&self, name: &str) -> bool {
        let mut stems = self.stems.lock().unwrap_or_else(|p| p.into_inner());
        stems.insert(name.to_string())
    }

    fn release(&self, name: &str) {
        let mut stems = self.stems.lock().unwrap_or_else(|p| p.into_inner());
        stems.remove(name);
    }
}

/// SEO fields of one post and where they came from.
struct PostMetadata {
    seo_title: String,
    description: String,
    tags: Vec<String>,
    source: MetadataSource,
}

#[instrument(skip_all, fields(raw = %config.raw_dir.display(), concurrency = config.concurrency))]
pub async fn run_optimize(
    config: &OptimizeConfig,
    reporting: &ReportingConfig,
    ledger: Arc<Ledger>,
    metadata: Option<Arc<MetadataService>>,
    notifier: &Notifier,
    progress: &dyn StageProgress,
) -> Result<OptimizeReport> {
    let started = Instant::now();

    if !config.raw_dir.is_dir() {
        warn!("raw directory does not exist, nothing to format");
        notifier
            .send(
                "threadvault optimize: nothing to do",
                &format!("{} does not exist", config.raw_dir.display()),
            )
            .await;
        return Ok(OptimizeReport {
            dedup: DedupCounts::default(),
            summary: FinalSummary::empty(started.elapsed()),
        });
    }

    let run_id = start_run(&ledger, STAGE).await;
    notifier
        .send(
            "threadvault optimize started",
            &format!(
                "AI metadata {}",
                if metadata.is_some() { "enabled" } else { "disabled, local rules only" }
            ),
        )
        .await;

    let processed = ledger.list_all(LedgerTable::Processed).await?;
    let entries = RawLayout::new(&config.raw_dir).scan_articles()?;
    let filtered = dedup::filter(entries, RawEntry::key, &processed, &HashSet::new());
    let counts = filtered.counts;
    info!(
        discovered = counts.discovered,
        admitted = counts.admitted,
        in_ledger = counts.in_ledger,
        "raw folders scanned"
    );

    if filtered.admitted.is_empty() {
        notifier
            .send(
                "threadvault optimize: nothing new",
                &format!("{} raw folders, all already formatted", counts.discovered),
            )
            .await;
        let summary = FinalSummary::empty(started.elapsed());
        progress.done(&summary);
        finish_run(&ledger, run_id, json!({ "dedup": counts, "summary": summary })).await;
        return Ok(OptimizeReport {
            dedup: counts,
            summary,
        });
    }

    let stems = existing_stems(&config.articles_dir)?;
    debug!(existing = stems.len(), "existing post names loaded");

    let ctx = Arc::new(OptimizeContext {
        config: config.clone(),
        ledger: ledger.clone(),
        metadata,
        stems: Mutex::new(stems),
    });

    progress.phase("formatting");
    progress.started(filtered.admitted.len());
    let stream = WorkerPool::new(config.concurrency).spawn(filtered.admitted, move |entry| {
        let ctx = ctx.clone();
        async move { process_entry(&ctx, entry).await }
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

    notifier.send("threadvault optimize finished", &summary.to_string()).await;
    progress.done(&summary);
    finish_run(&ledger, run_id, json!({ "dedup": counts, "summary": summary })).await;

    Ok(OptimizeReport {
        dedup: counts,
        summary,
    })
}

/// Stems of every post published in both variants: `{date}/{stem}.md` with a
/// matching `{date}_local/{stem}.md`. A post missing either file is
/// rendered again.
fn existing_stems(root: &Path) -> Result<HashSet<String>> {
    let mut stems = HashSet::new();
    let read = match std::fs::read_dir(root) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stems),
        Err(e) => return Err(ThreadvaultError::io(root, e)),
    };
    for entry in read {
        let dir = entry.map_err(|e| ThreadvaultError::io(root, e))?.path();
        let Some(date) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !dir.is_dir() || date.ends_with(LOCAL_SUFFIX) {
            continue;
        }
        let local_dir = root.join(format!("{date}{LOCAL_SUFFIX}"));
        for post in std::fs::read_dir(&dir).map_err(|e| ThreadvaultError::io(&dir, e))? {
            let path = post.map_err(|e| ThreadvaultError::io(&dir, e))?.path();
            if !path.extension().is_some_and(|ext| ext == "md") {
                continue;
            }
            let (Some(stem), Some(file)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.file_name(),
            ) else {
                continue;
            };
            if local_dir.join(file).is_file() {
                stems.insert(stem.to_string());
            }
        }
    }
    Ok(stems)
}

async fn process_entry(ctx: &OptimizeContext, entry: RawEntry) -> BatchOutcome {
    match format_entry(ctx, &entry).await {
        Ok(outcome) => outcome,
        Err(e) => BatchOutcome::error(entry.key(), e.to_string()),
    }
}

async fn format_entry(ctx: &OptimizeContext, entry: &RawEntry) -> Result<BatchOutcome> {
    let data_file = entry.data_file();
    let raw = std::fs::read(&data_file).map_err(|e| ThreadvaultError::io(&data_file, e))?;
    let article: RawArticle = serde_json::from_slice(&raw).map_err(|e| {
        ThreadvaultError::validation(format!("bad {}: {e}", data_file.display()))
    })?;
    let base_url = Url::parse(&article.source_url).ok();

    let draft = html_to_markdown(&article.content_html, base_url.as_ref())?;
    let meta = post_metadata(ctx, &article, &draft).await;

    let name = [meta.seo_title.as_str(), article.original_title.as_str(), entry.name.as_str()]
        .into_iter()
        .map(sanitize_filename)
        .find(|n| !n.is_empty())
        .unwrap_or_else(|| entry.name.clone());

    if !ctx.reserve(&name) {
        record_completion(&ctx.ledger, LedgerTable::Processed, &entry.key()).await;
        return Ok(BatchOutcome::skipped(
            &meta.seo_title,
            format!("already published as {name}.md"),
        ));
    }

    match write_posts(ctx, entry, &article, base_url.as_ref(), &meta, &name) {
        Ok(()) => {
            record_completion(&ctx.ledger, LedgerTable::Processed, &entry.key()).await;
            Ok(BatchOutcome::success(&meta.seo_title).with_metadata(meta.source))
        }
        Err(e) => {
            ctx.release(&name);
            Err(e)
        }
    }
}

/// AI metadata when available, local rules otherwise.
async fn post_metadata(ctx: &OptimizeContext, article: &RawArticle, draft: &str) -> PostMetadata {
    let rules = ctx.rules();

    if let Some(service) = &ctx.metadata {
        let snippet = metadata_snippet(draft);
        if let Some(ai) = service
            .seo_metadata(&article.original_title, &snippet, &article.author)
            .await
        {
            return PostMetadata {
                tags: merge_tags(&ai.tags, &article.author, &rules),
                seo_title: ai.seo_title,
                description: ai.description,
                source: MetadataSource::Ai,
            };
        }
    }

    PostMetadata {
        seo_title: create_seo_title(&article.original_title, SEO_TITLE_LIMIT),
        description: create_meta_description(draft, DESCRIPTION_LIMIT),
        tags: extract_tags_from_title(&article.original_title, &article.author, &rules),
        source: MetadataSource::Local,
    }
}

fn write_posts(
    ctx: &OptimizeContext,
    entry: &RawEntry,
    article: &RawArticle,
    base_url: Option<&Url>,
    meta: &PostMetadata,
    name: &str,
) -> Result<()> {
    let front_matter = FrontMatter {
        title: article.original_title.clone(),
        seo_title: meta.seo_title.clone(),
        cover: article.cover_image_url.clone(),
        description: meta.description.clone(),
        categories: vec![ctx.config.category.clone()],
        tags: meta.tags.clone(),
        date: Some(article.hexo_date.clone()),
    };
    let structured = StructuredData {
        seo_title: &meta.seo_title,
        original_title: &article.original_title,
        cover_url: article.cover_image_url.as_deref(),
        description: &meta.description,
        date_published: &article.hexo_date,
        author: &article.author,
        source_url: &article.source_url,
    }
    .to_script();

    let html = add_alt_tags(&article.content_html, &meta.seo_title);
    let render = |body: &str| {
        render_post(&HexoPost {
            front_matter: &front_matter,
            original_title: &article.original_title,
            author: &article.author,
            publish_date: &article.publish_date,
            body,
            source_url: &article.source_url,
            structured_data: &structured,
        })
    };

    let out = &ctx.config.articles_dir;
    let remote = render(&html_to_markdown(&html, base_url)?);

    // Local first: a post counts as published once its remote file exists.
    let images_dir = entry.images_dir();
    let local_images = localize_image_tags(&html, &meta.seo_title, |file| images_dir.join(file).is_file());
    let local_root = out.join(format!("{}{LOCAL_SUFFIX}", entry.date));
    let local = if local_images.files.is_empty() {
        remote.clone()
    } else {
        copy_images(&images_dir, &local_root.join(name), &local_images.files)?;
        render(&local_images.to_markdown(base_url)?)
    };
    write_atomic(&local_root.join(format!("{name}.md")), local.as_bytes())?;
    write_atomic(&out.join(&entry.date).join(format!("{name}.md")), remote.as_bytes())
}

fn copy_images(from: &Path, to: &Path, files: &[String]) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| ThreadvaultError::io(to, e))?;
    for file in files {
        let target: PathBuf = to.join(file);
        std::fs::copy(from.join(file), &target).map_err(|e| ThreadvaultError::io(&target, e))?;
    }
    Ok(())
}
