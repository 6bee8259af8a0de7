//! Core domain types shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use url::Url;

/// Longest identifier kept, in characters.
pub const MAX_ID_CHARS: usize = 150;

/// Characters that never survive into an identifier or filename.
const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Stable identifier of one work item, also used as its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Derive an identifier from a display title.
    ///
    /// Strips path-hostile characters, trims, and truncates to
    /// [`MAX_ID_CHARS`]. The same title always yields the same id. Returns
    /// `None` when nothing usable is left.
    pub fn from_title(title: &str) -> Option<Self> {
        let name = sanitize_filename(title);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return None;
        }
        Some(Self(name))
    }

    /// Wrap a name read back from disk or from the ledger as-is.
    pub fn from_existing(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remove `\ / * ? : " < > |`, trim, and cap at [`MAX_ID_CHARS`] characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect();
    cleaned.trim().chars().take(MAX_ID_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// One listing row turned into a unit of crawl work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: ItemId,
    /// Title as displayed on the listing page.
    pub title: String,
    /// Absolute URL of the thread detail page.
    pub detail_url: Url,
    /// Listing page the row was found on (1-based).
    pub page: u32,
    /// Raw date string from the listing row, e.g. `2024-05-01 12:30`.
    pub posted_at: Option<String>,
}

/// Content pulled from a thread detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDetail {
    /// Outer HTML of the post body.
    pub content_html: String,
    pub author: Option<String>,
    /// Post timestamp as printed on the page.
    pub posted_at: Option<String>,
    /// First image in the post, resolved against the page URL.
    pub cover_url: Option<String>,
}

/// The `data.json` artifact written for each crawled thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    pub original_title: String,
    pub source_url: String,
    pub author: String,
    pub publish_date: String,
    /// RFC 3339 timestamp of the crawl.
    pub scrape_date_utc: String,
    pub cover_image_url: Option<String>,
    /// Post HTML with downloaded image sources rewritten to `images/...`.
    pub content_html: String,
    /// `YYYY-MM-DD HH:MM:SS`, used verbatim as the Hexo `date`.
    pub hexo_date: String,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Terminal state of one work item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    PartialSuccess,
    Skipped,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

/// Where an article's SEO metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    Ai,
    Local,
}

/// In-memory result of processing one item. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub kind: OutcomeKind,
    pub title: String,
    /// Why the item failed, was skipped, or lost assets.
    pub reason: Option<String>,
    pub metadata: Option<MetadataSource>,
}

impl BatchOutcome {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            title: title.into(),
            reason: None,
            metadata: None,
        }
    }

    pub fn partial(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::PartialSuccess,
            title: title.into(),
            reason: Some(reason.into()),
            metadata: None,
        }
    }

    pub fn skipped(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            title: title.into(),
            reason: Some(reason.into()),
            metadata: None,
        }
    }

    pub fn error(title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Error,
            title: title.into(),
            reason: Some(reason.into()),
            metadata: None,
        }
    }

    /// Tag a success with the metadata source used to produce it.
    pub fn with_metadata(mut self, source: MetadataSource) -> Self {
        self.metadata = Some(source);
        self
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// SEO fields for a freshly formatted article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub seo_title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Full front-matter replacement produced by the refinement stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub title: String,
    #[serde(default)]
    pub seo_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
