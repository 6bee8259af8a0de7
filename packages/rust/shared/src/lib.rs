//! Shared types, error model, and configuration for threadvault.
//!
//! This crate is the foundation depended on by all other threadvault crates.
//! It provides:
//! - [`ThreadvaultError`] and [`FailureClass`], the unified error model
//! - Domain types ([`ItemId`], [`WorkItem`], [`RawArticle`], [`BatchOutcome`])
//! - Configuration ([`AppConfig`] and the per-stage runtime configs)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AiSection, AppConfig, CrawlConfig, CrawlSection, OptimizeConfig, OptimizeSection,
    PathsConfig, RefineConfig, RefineSection, ReportingConfig, ReportingSection, SourceConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, require_secret,
    resolve_secret,
};
pub use error::{FailureClass, Result, ThreadvaultError};
pub use types::{
    ArticleDetail, ArticleMetadata, BatchOutcome, ItemId, MAX_ID_CHARS, MetadataSource,
    OutcomeKind, RawArticle, SeoMetadata, WorkItem, sanitize_filename,
};
