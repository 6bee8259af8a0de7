//! Refine stage: rewrite post front matter with AI metadata, one slice per
//! invocation.
//!
//! Work is the set of `.md` files under the source root that have no
//! counterpart under the destination root, so the destination tree itself is
//! the completion record. A file whose metadata request fails is left
//! unwritten and comes up again next time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument};

use threadvault_markdown::{FrontMatter, front_matter_value, split_front_matter};
use threadvault_shared::{
    BatchOutcome, MetadataSource, RefineConfig, ReportingConfig, Result, ThreadvaultError,
};

use crate::commit::write_atomic;
use crate::enrichment::MetadataService;
use crate::notify::Notifier;
use crate::progress::{FinalSummary, ProgressReporter, StageProgress, log_outcome};

const STAGE: &str = "refine";

#[derive(Debug, Clone)]
pub struct RefineReport {
    /// Files without a refined counterpart before this run.
    pub pending: usize,
    /// Files picked for this run.
    pub selected: usize,
    pub summary: FinalSummary,
}

/// Relative paths of `.md` files under `source` missing from `dest`, sorted.
pub fn pending_paths(source: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let done = markdown_files(dest)?;
    Ok(markdown_files(source)?.difference(&done).cloned().collect())
}

fn markdown_files(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ThreadvaultError::io(&dir, e)),
        };
        for entry in read {
            let path = entry.map_err(|e| ThreadvaultError::io(&dir, e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.insert(rel.to_path_buf());
                }
            }
        }
    }
    Ok(files)
}

#[instrument(skip_all, fields(source = %config.source_dir.display(), batch = config.batch_size))]
pub async fn run_refine(
    config: &RefineConfig,
    reporting: &ReportingConfig,
    metadata: &MetadataService,
    notifier: &Notifier,
    progress: &dyn StageProgress,
) -> Result<RefineReport> {
    let started = Instant::now();

    if !config.source_dir.is_dir() {
        return Err(ThreadvaultError::config(format!(
            "input folder {} does not exist",
            config.source_dir.display()
        )));
    }
    std::fs::create_dir_all(&config.dest_dir)
        .map_err(|e| ThreadvaultError::io(&config.dest_dir, e))?;

    let pending = pending_paths(&config.source_dir, &config.dest_dir)?;
    let selected: Vec<PathBuf> = pending.iter().take(config.batch_size).cloned().collect();
    let remaining = pending.len() - selected.len();
    info!(pending = pending.len(), selected = selected.len(), "refine work set ready");

    if selected.is_empty() {
        notifier
            .send("threadvault refine: nothing new", "every article is already refined")
            .await;
        let summary = FinalSummary::empty(started.elapsed()).with_remaining(remaining);
        progress.done(&summary);
        return Ok(RefineReport {
            pending: pending.len(),
            selected: 0,
            summary,
        });
    }

    notifier
        .send(
            "threadvault refine started",
            &format!("{} of {} pending articles", selected.len(), pending.len()),
        )
        .await;

    progress.phase("refining");
    progress.started(selected.len());
    let mut reporter = ProgressReporter::new(selected.len(), reporting.batch_size);
    for (i, rel) in selected.iter().enumerate() {
        if i > 0 && !config.pacing.is_zero() {
            tokio::time::sleep(config.pacing).await;
        }

        let outcome = refine_file(config, metadata, rel).await;
        log_outcome(STAGE, &outcome);
        progress.item_finished(&outcome);
        if let Some(batch) = reporter.record(outcome) {
            notifier
                .send(
                    &format!("threadvault refine: {}/{}", batch.completed, batch.total),
                    &batch.to_string(),
                )
                .await;
        }
    }

    let summary = reporter.finish(started.elapsed()).with_remaining(remaining);
    notifier.send("threadvault refine finished", &summary.to_string()).await;
    progress.done(&summary);

    Ok(RefineReport {
        pending: pending.len(),
        selected: selected.len(),
        summary,
    })
}

async fn refine_file(config: &RefineConfig, metadata: &MetadataService, rel: &Path) -> BatchOutcome {
    let label = rel.display().to_string();
    let source = config.source_dir.join(rel);

    let content = match std::fs::read_to_string(&source) {
        Ok(content) => content,
        Err(e) => return BatchOutcome::error(label, ThreadvaultError::io(&source, e).to_string()),
    };
    let doc = split_front_matter(&content);
    if doc.body.is_empty() {
        return BatchOutcome::skipped(label, "empty body");
    }

    let Some(meta) = metadata.article_metadata(doc.body).await else {
        return BatchOutcome::skipped(label, "no AI metadata, will retry next run");
    };

    let previous = doc.front_matter.unwrap_or("");
    let front_matter = FrontMatter {
        title: meta.title,
        seo_title: meta.seo_title,
        cover: front_matter_value(previous, "cover"),
        description: meta.description,
        categories: meta.categories,
        tags: meta.tags,
        date: front_matter_value(previous, "date"),
    };
    let output = format!("{}\n{}\n", front_matter.render(), doc.body);

    let target = config.dest_dir.join(rel);
    match write_atomic(&target, output.as_bytes()) {
        Ok(()) => BatchOutcome::success(label).with_metadata(MetadataSource::Ai),
        Err(e) => BatchOutcome::error(label, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use threadvault_shared::AiConfig;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::enrichment::GeminiClient;
    use crate::progress::SilentProgress;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("threadvault-refine-{}", uuid::Uuid::now_v7()))
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config(root: &Path, batch_size: usize) -> RefineConfig {
        RefineConfig {
            source_dir: root.join("articles"),
            dest_dir: root.join("refined"),
            batch_size,
            pacing: Duration::ZERO,
        }
    }

    fn reporting() -> ReportingConfig {
        ReportingConfig {
            enabled: false,
            batch_size: 50,
            pushplus_url: Url::parse("https://push.example/send").unwrap(),
            pushplus_token: None,
        }
    }

    fn service(server: &MockServer) -> MetadataService {
        let client = GeminiClient::new(&AiConfig {
            endpoint: Url::parse(&server.uri()).unwrap(),
            model: "gemini-test".into(),
            api_key: "k".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        MetadataService::new(client, None)
    }

    fn answer(title: &str) -> ResponseTemplate {
        let text = json!({
            "title": title,
            "seo_title": "短标题",
            "description": "描述",
            "categories": ["资源贴"],
            "tags": ["ADV", "汉化"],
        })
        .to_string();
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        }))
    }

    #[test]
    fn pending_is_source_minus_dest() {
        let root = temp_root();
        write(&root, "articles/2024-05-01/a.md", "a");
        write(&root, "articles/2024-05-01/b.md", "b");
        write(&root, "articles/2024-05-02/c.md", "c");
        write(&root, "articles/2024-05-02/notes.txt", "x");
        write(&root, "refined/2024-05-01/a.md", "a");

        let pending = pending_paths(&root.join("articles"), &root.join("refined")).unwrap();
        assert_eq!(
            pending,
            vec![PathBuf::from("2024-05-01/b.md"), PathBuf::from("2024-05-02/c.md")]
        );
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn processes_one_slice_and_reports_remaining() {
        let root = temp_root();
        for name in ["a", "b", "c"] {
            write(
                &root,
                &format!("articles/2024-05-01/{name}.md"),
                &format!("---\ntitle: \"old\"\ndate: 2024-05-01 12:30:00\n---\n\nbody {name}\n"),
            );
        }

        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(answer("新标题")).expect(2).mount(&server).await;

        let report = run_refine(
            &config(&root, 2),
            &reporting(),
            &service(&server),
            &Notifier::Disabled,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.pending, 3);
        assert_eq!(report.selected, 2);
        assert_eq!(report.summary.remaining, Some(1));
        assert_eq!(report.summary.tally.success, 2);

        let refined = std::fs::read_to_string(root.join("refined/2024-05-01/a.md")).unwrap();
        assert!(refined.starts_with("---\ntitle: \"新标题\"\nseo_title: \"短标题\"\n"));
        assert!(refined.contains("date: 2024-05-01 12:30:00\n---\n\nbody a\n"));
        assert!(!root.join("refined/2024-05-01/c.md").exists());

        let left = pending_paths(&root.join("articles"), &root.join("refined")).unwrap();
        assert_eq!(left, vec![PathBuf::from("2024-05-01/c.md")]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_metadata_skips_without_writing() {
        let root = temp_root();
        write(&root, "articles/x/good.md", "---\ntitle: t\n---\ngood body\n");
        write(&root, "articles/x/bad.md", "---\ntitle: t\n---\nbad body\n");
        write(&root, "articles/x/empty.md", "---\ntitle: t\n---\n\n");

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("bad body"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("good body"))
            .respond_with(answer("好"))
            .mount(&server)
            .await;

        let report = run_refine(
            &config(&root, 30),
            &reporting(),
            &service(&server),
            &Notifier::Disabled,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.summary.tally.success, 1);
        assert_eq!(report.summary.tally.skipped, 2);
        assert!(root.join("refined/x/good.md").is_file());
        assert!(!root.join("refined/x/bad.md").exists());
        assert!(!root.join("refined/x/empty.md").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let root = temp_root();
        let server = MockServer::start().await;
        let err = run_refine(
            &config(&root, 30),
            &reporting(),
            &service(&server),
            &Notifier::Disabled,
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
