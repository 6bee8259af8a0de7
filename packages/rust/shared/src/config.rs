//! Application configuration for threadvault.
//!
//! Lookup order for the config file: `--config <path>`, then
//! `./threadvault.toml`, then `~/.threadvault/threadvault.toml`.
//! CLI flags (and their env vars) override config file values, which
//! override defaults. Secrets are never stored in the file, only the names
//! of the env vars that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ThreadvaultError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "threadvault.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".threadvault";

// ---------------------------------------------------------------------------
// Config structs (matching threadvault.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Forum being ingested.
    #[serde(default)]
    pub source: SourceConfig,

    /// Crawl stage tuning.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// On-disk locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Progress summaries and notification delivery.
    #[serde(default)]
    pub reporting: ReportingSection,

    /// AI metadata service.
    #[serde(default)]
    pub ai: AiSection,

    /// Hexo formatter stage.
    #[serde(default)]
    pub optimize: OptimizeSection,

    /// Front-matter refinement stage.
    #[serde(default)]
    pub refine: RefineSection,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Forum root; listing and detail references are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// Board id appended to `thread.php?fid-`.
    #[serde(default = "default_forum_id")]
    pub forum_id: String,

    /// Env var holding the raw `Cookie` header for the logged-in session.
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,

    /// User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            forum_id: default_forum_id(),
            cookie_env: default_cookie_env(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse("https://www.south-plus.net/").expect("static URL is valid")
}
fn default_forum_id() -> String {
    "19".into()
}
fn default_cookie_env() -> String {
    "SPLUS_COOKIE".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/138.0.0.0 Safari/537.36"
        .into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Worker count for detail fetching.
    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: usize,

    /// Total fetch attempts per item (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between fetch attempts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_detail_timeout_secs")]
    pub detail_timeout_secs: u64,

    #[serde(default = "default_listing_timeout_secs")]
    pub listing_timeout_secs: u64,

    #[serde(default = "default_asset_timeout_secs")]
    pub asset_timeout_secs: u64,

    /// Pause before each listing page after the first.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            concurrency: default_crawl_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            detail_timeout_secs: default_detail_timeout_secs(),
            listing_timeout_secs: default_listing_timeout_secs(),
            asset_timeout_secs: default_asset_timeout_secs(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

fn default_crawl_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    30
}
fn default_detail_timeout_secs() -> u64 {
    20
}
fn default_listing_timeout_secs() -> u64 {
    30
}
fn default_asset_timeout_secs() -> u64 {
    30
}
fn default_page_delay_ms() -> u64 {
    1000
}

/// `[paths]` section. Relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Raw crawl output: `{raw_dir}/{date}/{id}/data.json`.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,

    /// Hexo-formatted articles produced by `optimize`.
    #[serde(default = "default_articles_dir")]
    pub articles_dir: PathBuf,

    /// Articles with AI-refined front matter produced by `refine`.
    #[serde(default = "default_refined_dir")]
    pub refined_dir: PathBuf,

    /// Ledger database file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            articles_dir: default_articles_dir(),
            refined_dir: default_refined_dir(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_raw_dir() -> PathBuf {
    "South-Plus-Raw-Data".into()
}
fn default_articles_dir() -> PathBuf {
    "South-Plus-Articles".into()
}
fn default_refined_dir() -> PathBuf {
    "ai-optimized-articles".into()
}
fn default_ledger_path() -> PathBuf {
    "progress.db".into()
}

/// `[reporting]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingSection {
    /// Master switch for notifications. Summaries are still logged when off.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Emit a batch summary every this many completed items.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Env var holding the PushPlus token. Without it summaries go to the log.
    #[serde(default = "default_pushplus_token_env")]
    pub pushplus_token_env: String,

    #[serde(default = "default_pushplus_url")]
    pub pushplus_url: Url,
}

impl Default for ReportingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            pushplus_token_env: default_pushplus_token_env(),
            pushplus_url: default_pushplus_url(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    50
}
fn default_pushplus_token_env() -> String {
    "PUSHPLUS_TOKEN".into()
}
fn default_pushplus_url() -> Url {
    Url::parse("http://www.pushplus.plus/send").expect("static URL is valid")
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the Generative Language API.
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: Url,

    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint: default_ai_endpoint(),
            timeout_secs: default_ai_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.5-flash-lite".into()
}
fn default_ai_endpoint() -> Url {
    Url::parse("https://generativelanguage.googleapis.com/").expect("static URL is valid")
}
fn default_ai_timeout_secs() -> u64 {
    60
}

/// `[optimize]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeSection {
    #[serde(default = "default_optimize_concurrency")]
    pub concurrency: usize,

    /// Hexo category written into every article.
    #[serde(default = "default_category")]
    pub category: String,

    /// Tags appended to every article.
    #[serde(default = "default_extra_tags")]
    pub extra_tags: Vec<String>,

    /// Bracketed title fragments never promoted to tags (case-insensitive).
    #[serde(default = "default_tag_blacklist")]
    pub tag_blacklist: Vec<String>,

    /// Author placeholder when the post has none.
    #[serde(default = "default_unknown_author")]
    pub unknown_author: String,
}

impl Default for OptimizeSection {
    fn default() -> Self {
        Self {
            concurrency: default_optimize_concurrency(),
            category: default_category(),
            extra_tags: default_extra_tags(),
            tag_blacklist: default_tag_blacklist(),
            unknown_author: default_unknown_author(),
        }
    }
}

fn default_optimize_concurrency() -> usize {
    1
}
fn default_category() -> String {
    "资源贴".into()
}
fn default_extra_tags() -> Vec<String> {
    vec!["汉化".into(), "GALGAME".into()]
}
fn default_tag_blacklist() -> Vec<String> {
    ["自购", "新汉化作品", "合集", "bd", "od", "bo"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_unknown_author() -> String {
    "未知作者".into()
}

/// `[refine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineSection {
    /// Files handled per invocation.
    #[serde(default = "default_refine_batch_size")]
    pub batch_size: usize,

    /// Pause between files.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for RefineSection {
    fn default() -> Self {
        Self {
            batch_size: default_refine_batch_size(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

fn default_refine_batch_size() -> usize {
    30
}
fn default_pacing_ms() -> u64 {
    2000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: Url,
    pub forum_id: String,
    pub user_agent: String,
    /// Raw `Cookie` header value. Resolved from the environment by the caller.
    pub cookie: Option<String>,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub detail_timeout: Duration,
    pub listing_timeout: Duration,
    pub asset_timeout: Duration,
    pub page_delay: Duration,
    pub raw_dir: PathBuf,
    pub unknown_author: String,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.source.base_url.clone(),
            forum_id: config.source.forum_id.clone(),
            user_agent: config.source.user_agent.clone(),
            cookie: None,
            concurrency: config.crawl.concurrency,
            max_attempts: config.crawl.max_attempts,
            retry_delay: Duration::from_secs(config.crawl.retry_delay_secs),
            detail_timeout: Duration::from_secs(config.crawl.detail_timeout_secs),
            listing_timeout: Duration::from_secs(config.crawl.listing_timeout_secs),
            asset_timeout: Duration::from_secs(config.crawl.asset_timeout_secs),
            page_delay: Duration::from_millis(config.crawl.page_delay_ms),
            raw_dir: config.paths.raw_dir.clone(),
            unknown_author: config.optimize.unknown_author.clone(),
        }
    }
}

/// Runtime reporting configuration.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub pushplus_url: Url,
    /// PushPlus token, resolved from the environment.
    pub pushplus_token: Option<String>,
}

impl From<&AppConfig> for ReportingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            enabled: config.reporting.enabled,
            batch_size: config.reporting.batch_size,
            pushplus_url: config.reporting.pushplus_url.clone(),
            pushplus_token: resolve_secret(&config.reporting.pushplus_token_env),
        }
    }
}

/// Runtime AI configuration. Only built when a key is available.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: Url,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl AiConfig {
    /// Build from the `[ai]` section, or `None` when the key env var is unset.
    pub fn from_app(config: &AppConfig) -> Option<Self> {
        resolve_secret(&config.ai.api_key_env).map(|api_key| Self {
            endpoint: config.ai.endpoint.clone(),
            model: config.ai.model.clone(),
            api_key,
            timeout: Duration::from_secs(config.ai.timeout_secs),
        })
    }
}

/// Runtime configuration for the Hexo formatter stage.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub raw_dir: PathBuf,
    pub articles_dir: PathBuf,
    pub concurrency: usize,
    pub category: String,
    pub extra_tags: Vec<String>,
    pub tag_blacklist: Vec<String>,
    pub unknown_author: String,
}

impl From<&AppConfig> for OptimizeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            raw_dir: config.paths.raw_dir.clone(),
            articles_dir: config.paths.articles_dir.clone(),
            concurrency: config.optimize.concurrency,
            category: config.optimize.category.clone(),
            extra_tags: config.optimize.extra_tags.clone(),
            tag_blacklist: config.optimize.tag_blacklist.clone(),
            unknown_author: config.optimize.unknown_author.clone(),
        }
    }
}

/// Runtime configuration for the front-matter refinement stage.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub batch_size: usize,
    pub pacing: Duration,
}

impl From<&AppConfig> for RefineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            source_dir: config.paths.articles_dir.clone(),
            dest_dir: config.paths.refined_dir.clone(),
            batch_size: config.refine.batch_size,
            pacing: Duration::from_millis(config.refine.pacing_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.threadvault/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ThreadvaultError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.threadvault/threadvault.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config. An explicit path must exist; otherwise the
/// working-directory file wins over the user file, and defaults apply when
/// neither exists.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return load_config_from(&local);
    }

    let path = config_file_path()?;
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ThreadvaultError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ThreadvaultError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ThreadvaultError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ThreadvaultError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ThreadvaultError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var. Empty values count as unset.
pub fn resolve_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Like [`resolve_secret`] but missing values are a config error.
pub fn require_secret(var_name: &str, purpose: &str) -> Result<String> {
    resolve_secret(var_name).ok_or_else(|| {
        ThreadvaultError::config(format!(
            "{purpose} not found. Set the {var_name} environment variable."
        ))
    })
}
