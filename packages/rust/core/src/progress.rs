//! Outcome tallies, batch summaries, and progress callbacks.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use threadvault_shared::{BatchOutcome, MetadataSource, OutcomeKind};

use crate::notify::Notifier;
use crate::pool::OutcomeStream;

/// Counts of outcomes by kind and metadata source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub success: usize,
    pub partial: usize,
    pub skipped: usize,
    pub error: usize,
    /// Successes whose metadata came from the AI collaborator.
    pub ai: usize,
    /// Successes whose metadata came from local rules.
    pub local: usize,
}

impl Tally {
    pub fn add(&mut self, outcome: &BatchOutcome) {
        match outcome.kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::PartialSuccess => self.partial += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Error => self.error += 1,
        }
        match outcome.metadata {
            Some(MetadataSource::Ai) => self.ai += 1,
            Some(MetadataSource::Local) => self.local += 1,
            None => {}
        }
    }

    pub fn of(outcomes: &[BatchOutcome]) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            tally.add(outcome);
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.success + self.partial + self.skipped + self.error
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success {}, partial {}, skipped {}, error {}",
            self.success, self.partial, self.skipped, self.error
        )?;
        if self.ai + self.local > 0 {
            write!(f, " (AI {}, local {})", self.ai, self.local)?;
        }
        Ok(())
    }
}

/// Emitted every `batch_size` completions and at the last item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub total: usize,
    pub tally: Tally,
    /// Failed and partial items of this batch.
    pub problems: Vec<BatchOutcome>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "progress {}/{}", self.completed, self.total)?;
        writeln!(f, "this batch: {}", self.tally)?;
        write_problems(f, &self.problems)
    }
}

/// Emitted once at the end of every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalSummary {
    pub total: usize,
    pub tally: Tally,
    #[serde(rename = "elapsed_secs", serialize_with = "secs")]
    pub elapsed: Duration,
    /// Items left for a later run, when the stage works in slices.
    pub remaining: Option<usize>,
    #[serde(skip)]
    pub problems: Vec<BatchOutcome>,
}

fn secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl FinalSummary {
    /// Summary of a run that had nothing to do.
    pub fn empty(elapsed: Duration) -> Self {
        Self {
            total: 0,
            tally: Tally::default(),
            elapsed,
            remaining: None,
            problems: Vec::new(),
        }
    }

    pub fn with_remaining(mut self, remaining: usize) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Compact JSON stored with the run record.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for FinalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "processed {} items in {:.1}s", self.total, self.elapsed.as_secs_f64())?;
        writeln!(f, "{}", self.tally)?;
        if let Some(remaining) = self.remaining {
            writeln!(f, "remaining: {remaining}")?;
        }
        write_problems(f, &self.problems)
    }
}

fn write_problems(f: &mut fmt::Formatter<'_>, problems: &[BatchOutcome]) -> fmt::Result {
    for outcome in problems {
        let reason = outcome.reason.as_deref().unwrap_or("unknown");
        writeln!(f, "- [{}] {}: {}", outcome.kind.as_str(), outcome.title, reason)?;
    }
    Ok(())
}

fn is_problem(outcome: &BatchOutcome) -> bool {
    matches!(outcome.kind, OutcomeKind::Error | OutcomeKind::PartialSuccess)
}

/// Running counter plus batch buffer, owned by the collector.
#[derive(Debug)]
pub struct ProgressReporter {
    total: usize,
    batch_size: usize,
    completed: usize,
    batch: Vec<BatchOutcome>,
    all: Vec<BatchOutcome>,
}

impl ProgressReporter {
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            total,
            batch_size: batch_size.max(1),
            completed: 0,
            batch: Vec::new(),
            all: Vec::with_capacity(total),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Count one outcome. Returns a summary at each batch boundary and at the
    /// last item.
    pub fn record(&mut self, outcome: BatchOutcome) -> Option<BatchSummary> {
        self.completed += 1;
        self.batch.push(outcome.clone());
        self.all.push(outcome);

        if self.completed % self.batch_size != 0 && self.completed != self.total {
            return None;
        }

        let batch = std::mem::take(&mut self.batch);
        Some(BatchSummary {
            completed: self.completed,
            total: self.total,
            tally: Tally::of(&batch),
            problems: batch.into_iter().filter(is_problem).collect(),
        })
    }

    /// Summary over every recorded outcome.
    pub fn finish(self, elapsed: Duration) -> FinalSummary {
        FinalSummary {
            total: self.all.len(),
            tally: Tally::of(&self.all),
            elapsed,
            remaining: None,
            problems: self.all.into_iter().filter(is_problem).collect(),
        }
    }
}

/// Log one finished item.
pub fn log_outcome(stage: &str, outcome: &BatchOutcome) {
    let reason = outcome.reason.as_deref().unwrap_or("");
    match outcome.kind {
        OutcomeKind::Success => info!(stage, title = %outcome.title, "item done"),
        OutcomeKind::Skipped => info!(stage, title = %outcome.title, reason, "item skipped"),
        OutcomeKind::PartialSuccess => warn!(stage, title = %outcome.title, reason, "item partially done"),
        OutcomeKind::Error => warn!(stage, title = %outcome.title, reason, "item failed"),
    }
}

/// Single collector for a running pool: counts every outcome, forwards
/// batch summaries to the notifier, and returns the final summary once all
/// workers have exited.
pub async fn collect_outcomes(
    mut stream: OutcomeStream,
    batch_size: usize,
    stage: &str,
    notifier: &Notifier,
    progress: &dyn StageProgress,
    started: Instant,
) -> FinalSummary {
    let mut reporter = ProgressReporter::new(stream.total(), batch_size);
    while let Some(outcome) = stream.next().await {
        log_outcome(stage, &outcome);
        progress.item_finished(&outcome);
        if let Some(batch) = reporter.record(outcome) {
            info!(stage, completed = batch.completed, total = batch.total, "batch finished");
            notifier
                .send(
                    &format!("threadvault {stage}: {}/{}", batch.completed, batch.total),
                    &batch.to_string(),
                )
                .await;
        }
    }
    stream.join().await;
    reporter.finish(started.elapsed())
}

/// Callbacks for a live progress display.
pub trait StageProgress: Send + Sync {
    /// Named phase change, e.g. "listing" or "processing".
    fn phase(&self, name: &str);
    /// The admitted work set is known.
    fn started(&self, total: usize);
    fn item_finished(&self, outcome: &BatchOutcome);
    fn done(&self, summary: &FinalSummary);
}

/// No-op progress display.
pub struct SilentProgress;

impl StageProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn started(&self, _total: usize) {}
    fn item_finished(&self, _outcome: &BatchOutcome) {}
    fn done(&self, _summary: &FinalSummary) {}
}
