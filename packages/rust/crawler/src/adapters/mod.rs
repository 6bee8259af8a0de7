//! Forum adapter trait and the built-in phpwind adapter.
//!
//! An adapter knows the URL scheme and page markup of one forum engine. All
//! methods are synchronous and take an already-parsed [`Html`] so callers can
//! drop the document before the next `.await`.

mod phpwind;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use threadvault_shared::{ArticleDetail, Result};

pub use phpwind::PhpWindAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One thread row scraped from a listing page, before URL resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    /// Link as it appears in the markup, usually relative.
    pub href: String,
    pub posted_at: Option<String>,
}

/// Markup knowledge for one forum engine.
pub trait SiteAdapter: Send + Sync {
    /// Absolute URL of listing page `page` (1-based) of `forum_id`.
    fn listing_url(&self, base: &Url, forum_id: &str, page: u32) -> Result<Url>;

    /// Page count printed in the pager. Defaults to 1 when absent.
    fn total_pages(&self, doc: &Html) -> u32;

    /// Thread rows below the pinned section, in page order.
    fn listing_rows(&self, doc: &Html) -> Vec<ListingRow>;

    /// Purchase/unlock link when the post body is gated.
    fn unlock_url(&self, doc: &Html, base: &Url) -> Option<Url>;

    /// Post body and byline. `None` when the body is missing or empty.
    fn extract_detail(&self, doc: &Html, page_url: &Url) -> Option<ArticleDetail>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Text content with each fragment trimmed and joined, like a browser's
/// stripped `textContent`.
pub(crate) fn stripped_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("")
}
