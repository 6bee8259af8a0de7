//! Forum access: HTTP session, listing enumeration, thread fetch, and images.
//!
//! This crate provides:
//! - [`client`]: cookie-authenticated [`ForumClient`]
//! - [`adapters`]: forum markup knowledge behind [`SiteAdapter`]
//! - [`enumerator`]: lazy, paged listing cursor
//! - [`detail`]: thread fetch with unlock and retry
//! - [`assets`]: image download and `src` rewriting

pub mod adapters;
pub mod assets;
pub mod client;
pub mod detail;
pub mod enumerator;
pub mod retry;

pub use adapters::{ListingRow, PhpWindAdapter, SiteAdapter};
pub use assets::{AssetFailure, LocalizedHtml, extension_for, localize_images};
pub use client::{ForumClient, cookie_header};
pub use detail::fetch_detail;
pub use enumerator::{Enumerator, ListingPage};
pub use retry::{RetryPolicy, retry_fixed};

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;
    use url::Url;

    fn load_fixture(name: &str) -> Html {
        let path = format!("../../../fixtures/html/{name}");
        let content = std::fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("missing fixture: {path}"));
        Html::parse_document(&content)
    }

    fn forum_url() -> Url {
        Url::parse("https://www.south-plus.net/").unwrap()
    }

    // -----------------------------------------------------------------------
    // Listing fixture
    // -----------------------------------------------------------------------

    #[test]
    fn listing_fixture_page_count() {
        let doc = load_fixture("phpwind_listing.html");
        assert_eq!(PhpWindAdapter.total_pages(&doc), 12);
    }

    #[test]
    fn listing_fixture_rows_exclude_pinned() {
        let doc = load_fixture("phpwind_listing.html");
        let rows = PhpWindAdapter.listing_rows(&doc);

        let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "[ADV] 星之终途 汉化硬盘版",
                "[SLG] 魔法少女的日常 v1.02",
                "[RPG] 迷宫探索者: 完全版/DL",
            ]
        );
        assert_eq!(rows[0].posted_at.as_deref(), Some("2024-05-01 12:30"));
        assert_eq!(rows[1].posted_at.as_deref(), Some("2024-04-30"));
    }

    #[test]
    fn listing_fixture_ids_are_path_safe() {
        let doc = load_fixture("phpwind_listing.html");
        let rows = PhpWindAdapter.listing_rows(&doc);
        let id = threadvault_shared::ItemId::from_title(&rows[2].title).unwrap();
        assert_eq!(id.as_str(), "[RPG] 迷宫探索者 完全版DL");
    }

    // -----------------------------------------------------------------------
    // Thread fixture
    // -----------------------------------------------------------------------

    #[test]
    fn thread_fixture_detail() {
        let doc = load_fixture("phpwind_thread.html");
        let page = forum_url().join("read.php?tid-2001.html").unwrap();
        let detail = PhpWindAdapter.extract_detail(&doc, &page).unwrap();

        assert_eq!(detail.author.as_deref(), Some("uploader"));
        assert_eq!(detail.posted_at.as_deref(), Some("2024-05-01 12:30"));
        assert_eq!(
            detail.cover_url.as_deref(),
            Some("https://img.example.net/covers/star.jpg")
        );
        assert!(detail.content_html.contains("【游戏类型】：ADV"));
        assert!(PhpWindAdapter.unlock_url(&doc, &forum_url()).is_none());
    }
}
