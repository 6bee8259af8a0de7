//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use threadvault_core::progress::StageProgress;
use threadvault_core::{
    FinalSummary, GeminiClient, MetadataService, Notifier, finish_run, run_crawl, run_optimize,
    run_refine, session_cookie, start_run,
};
use threadvault_crawler::PhpWindAdapter;
use threadvault_shared::{
    AiConfig, AppConfig, BatchOutcome, CrawlConfig, OptimizeConfig, RefineConfig,
    ReportingConfig, init_config, load_config, require_secret,
};
use threadvault_storage::{Ledger, LedgerTable};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// threadvault: resumable forum ingestion into Hexo posts.
#[derive(Parser)]
#[command(
    name = "threadvault",
    version,
    about = "Crawl forum threads, render them as Hexo posts, and refine their SEO metadata.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file. Defaults to ./threadvault.toml, then ~/.threadvault/threadvault.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl threads not yet collected into the raw tree.
    Crawl {
        /// Forum id to walk.
        #[arg(long, env = "FID")]
        forum: Option<String>,

        /// Threads fetched at once.
        #[arg(long, env = "MAX_THREADS")]
        concurrency: Option<usize>,

        /// Items per progress notification.
        #[arg(long, env = "REPORTING_BATCH_SIZE")]
        batch_size: Option<usize>,
    },

    /// Render crawled threads into Hexo posts.
    Optimize {
        /// Folders formatted at once.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Items per progress notification.
        #[arg(long, env = "REPORTING_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Use local SEO rules even when an AI key is set.
        #[arg(long)]
        no_ai: bool,
    },

    /// Rewrite post front matter with AI metadata, one slice per run.
    Refine {
        /// Articles handled in this run.
        #[arg(long, env = "REFINE_BATCH_SIZE")]
        batch_size: Option<usize>,
    },

    /// Show ledger sizes and recent runs.
    Status {
        /// Number of runs to list.
        #[arg(long, default_value = "10")]
        runs: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "threadvault=info",
        1 => "threadvault=debug",
        _ => "threadvault=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Crawl {
            forum,
            concurrency,
            batch_size,
        } => cmd_crawl(config_path, forum, concurrency, batch_size).await,
        Command::Optimize {
            concurrency,
            batch_size,
            no_ai,
        } => cmd_optimize(config_path, concurrency, batch_size, no_ai).await,
        Command::Refine { batch_size } => cmd_refine(config_path, batch_size).await,
        Command::Status { runs } => cmd_status(config_path, runs).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn reporting_config(app: &AppConfig, batch_size: Option<usize>) -> ReportingConfig {
    let mut reporting = ReportingConfig::from(app);
    if let Some(size) = batch_size {
        reporting.batch_size = size.max(1);
    }
    reporting
}

async fn open_ledger(app: &AppConfig) -> Result<Arc<Ledger>> {
    let ledger = Ledger::open(&app.paths.ledger_path).await?;
    Ok(Arc::new(ledger))
}

fn print_summary(title: &str, summary: &FinalSummary) {
    println!();
    println!("  {title}");
    for line in summary.to_string().lines() {
        println!("  {line}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    config_path: Option<&Path>,
    forum: Option<String>,
    concurrency: Option<usize>,
    batch_size: Option<usize>,
) -> Result<()> {
    let app = load_config(config_path)?;

    let mut crawl = CrawlConfig::from(&app);
    if let Some(forum) = forum {
        crawl.forum_id = forum;
    }
    if let Some(n) = concurrency {
        crawl.concurrency = n.max(1);
    }
    let reporting = reporting_config(&app, batch_size);
    let notifier = Notifier::from_config(&reporting);
    crawl.cookie = Some(session_cookie(&app.source.cookie_env, &notifier).await?);

    info!(
        forum = %crawl.forum_id,
        concurrency = crawl.concurrency,
        batch_size = reporting.batch_size,
        "starting crawl"
    );

    let ledger = open_ledger(&app).await?;
    let progress = CliProgress::new();

    let report = run_crawl(
        &crawl,
        &reporting,
        Arc::new(PhpWindAdapter),
        ledger,
        &notifier,
        &progress,
    )
    .await?;

    let d = report.dedup;
    println!(
        "  Listed {} threads: {} new, {} in ledger, {} on disk ({} reconciled), {} repeated",
        d.discovered, d.admitted, d.in_ledger, d.on_disk, d.reconciled, d.duplicates
    );
    print_summary("Crawl finished", &report.summary);
    Ok(())
}

async fn cmd_optimize(
    config_path: Option<&Path>,
    concurrency: Option<usize>,
    batch_size: Option<usize>,
    no_ai: bool,
) -> Result<()> {
    let app = load_config(config_path)?;

    let mut optimize = OptimizeConfig::from(&app);
    if let Some(n) = concurrency {
        optimize.concurrency = n.max(1);
    }
    let reporting = reporting_config(&app, batch_size);
    let ledger = open_ledger(&app).await?;

    let ai = if no_ai { None } else { AiConfig::from_app(&app) };
    let metadata = match ai {
        Some(ai) => Some(Arc::new(MetadataService::new(
            GeminiClient::new(&ai)?,
            Some(ledger.clone()),
        ))),
        None => {
            info!("no AI key, using local SEO rules");
            None
        }
    };

    let notifier = Notifier::from_config(&reporting);
    let progress = CliProgress::new();
    let report = run_optimize(&optimize, &reporting, ledger, metadata, &notifier, &progress).await?;

    println!(
        "  Found {} raw folders: {} new, {} already formatted",
        report.dedup.discovered, report.dedup.admitted, report.dedup.in_ledger
    );
    print_summary("Optimize finished", &report.summary);
    Ok(())
}

async fn cmd_refine(config_path: Option<&Path>, batch_size: Option<usize>) -> Result<()> {
    let app = load_config(config_path)?;

    require_secret(&app.ai.api_key_env, "AI API key")?;
    let ai = AiConfig::from_app(&app)
        .ok_or_else(|| eyre!("AI API key not found in {}", app.ai.api_key_env))?;

    let mut refine = RefineConfig::from(&app);
    if let Some(size) = batch_size {
        refine.batch_size = size.max(1);
    }
    let reporting = reporting_config(&app, None);

    let ledger = open_ledger(&app).await?;
    let metadata = MetadataService::new(GeminiClient::new(&ai)?, Some(ledger.clone()));
    let notifier = Notifier::from_config(&reporting);
    let progress = CliProgress::new();

    let run_id = start_run(&ledger, "refine").await;
    let report = run_refine(&refine, &reporting, &metadata, &notifier, &progress).await?;
    finish_run(
        &ledger,
        run_id,
        serde_json::json!({ "pending": report.pending, "summary": report.summary }),
    )
    .await;

    println!(
        "  {} articles pending, {} handled this run",
        report.pending, report.selected
    );
    print_summary("Refine finished", &report.summary);
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, runs: u32) -> Result<()> {
    let app = load_config(config_path)?;
    let ledger = Ledger::open_readonly(&app.paths.ledger_path).await?;

    let scraped = ledger.count(LedgerTable::Scraped).await?;
    let processed = ledger.count(LedgerTable::Processed).await?;

    println!();
    println!("  Ledger:    {}", app.paths.ledger_path.display());
    println!("  Scraped:   {scraped}");
    println!("  Processed: {processed}");
    println!();

    let recent = ledger.recent_runs(runs).await?;
    if recent.is_empty() {
        println!("  No runs recorded yet.");
        return Ok(());
    }
    println!("  Recent runs:");
    for run in recent {
        println!(
            "  {:<9} {}  {}  {}",
            run.stage,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("unfinished"),
            run.stats_json.as_deref().unwrap_or("")
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress display
// ---------------------------------------------------------------------------

/// Spinner while listing, then a bar over the admitted work set.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl StageProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
    }

    fn item_finished(&self, outcome: &BatchOutcome) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("[{}] {}", outcome.kind.as_str(), outcome.title));
    }

    fn done(&self, _summary: &FinalSummary) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
