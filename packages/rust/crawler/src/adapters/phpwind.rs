//! phpwind 8.x forum adapter (South-Plus and mirrors).

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use super::{ListingRow, SiteAdapter, selector, stripped_text};
use threadvault_shared::{ArticleDetail, Result, ThreadvaultError};

/// Text of the table cell that separates pinned threads from normal ones.
const NORMAL_THREADS_MARKER: &str = "普通主题";

static PAGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)").expect("valid regex"));

/// Adapter for phpwind listing and `read.php` thread pages.
pub struct PhpWindAdapter;

impl SiteAdapter for PhpWindAdapter {
    fn listing_url(&self, base: &Url, forum_id: &str, page: u32) -> Result<Url> {
        let reference = if page <= 1 {
            format!("thread.php?fid-{forum_id}.html")
        } else {
            format!("thread.php?fid-{forum_id}-page-{page}.html")
        };
        base.join(&reference)
            .map_err(|e| ThreadvaultError::config(format!("bad listing URL '{reference}': {e}")))
    }

    fn total_pages(&self, doc: &Html) -> u32 {
        let pager = selector("li.pagesone");
        doc.select(&pager)
            .next()
            .and_then(|el| {
                let text = el.text().collect::<String>();
                PAGER_RE
                    .captures(&text)
                    .and_then(|caps| caps.get(2))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
            })
            .unwrap_or(1)
            .max(1)
    }

    fn listing_rows(&self, doc: &Html) -> Vec<ListingRow> {
        let link_sel = selector(r#"a[id^="a_ajax_"]"#);
        let date_span_sel = selector("td.author em span");
        let date_sel = selector("td.author em");

        candidate_rows(doc)
            .into_iter()
            .filter_map(|row| {
                let link = row.select(&link_sel).next()?;
                let href = link.value().attr("href")?.trim().to_string();
                let title = stripped_text(&link);
                if href.is_empty() || title.is_empty() {
                    return None;
                }
                let posted_at = row
                    .select(&date_span_sel)
                    .next()
                    .or_else(|| row.select(&date_sel).next())
                    .map(|el| stripped_text(&el))
                    .filter(|s| !s.is_empty());
                Some(ListingRow {
                    title,
                    href,
                    posted_at,
                })
            })
            .collect()
    }

    fn unlock_url(&self, doc: &Html, base: &Url) -> Option<Url> {
        let button = selector("input[onclick*='job.php?action=buytopic']");
        let onclick = doc.select(&button).next()?.value().attr("onclick")?;
        // onclick="location.href='job.php?action=buytopic&tid=...'"
        let target = onclick.split('\'').nth(1)?;
        base.join(target).ok()
    }

    fn extract_detail(&self, doc: &Html, page_url: &Url) -> Option<ArticleDetail> {
        let body = doc.select(&selector("div#read_tpc")).next()?;
        if body.text().all(|t| t.trim().is_empty()) {
            return None;
        }

        let author = doc
            .select(&selector("th.r_two strong"))
            .next()
            .map(|el| stripped_text(&el))
            .filter(|s| !s.is_empty());
        let posted_at = doc
            .select(&selector("div.tiptop span.fl.gray"))
            .next()
            .map(|el| stripped_text(&el))
            .filter(|s| !s.is_empty());
        let cover_url = body
            .select(&selector("img[src]"))
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| page_url.join(src.trim()).ok())
            .map(String::from);

        Some(ArticleDetail {
            content_html: body.html(),
            author,
            posted_at,
            cover_url,
        })
    }

    fn name(&self) -> &str {
        "phpwind"
    }
}

/// Rows after the "normal threads" separator, or every `tr.tr3.t_one` when
/// the separator is missing.
fn candidate_rows(doc: &Html) -> Vec<ElementRef<'_>> {
    let separator = doc.select(&selector("td")).find(|td| {
        td.children()
            .filter_map(|child| child.value().as_text())
            .any(|text| text.contains(NORMAL_THREADS_MARKER))
    });

    let separator_row = separator.and_then(|td| {
        td.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "tr")
    });

    match separator_row {
        Some(row) => row
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "tr")
            .collect(),
        None => doc.select(&selector("tr.tr3.t_one")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
<html><body>
<ul><li class="pagesone">Pages: 1/37 Go</li></ul>
<table>
  <tr class="tr3 t_one"><td><a id="a_ajax_1" href="read.php?tid-1.html">Pinned rules</a></td>
      <td class="author"><em>2020-01-01</em></td></tr>
  <tr><td colspan="5">普通主题</td></tr>
  <tr class="tr3 t_one"><td><a id="a_ajax_10" href="read.php?tid-10.html"> Game <b>A</b> </a></td>
      <td class="author"><em><span>2024-05-01 12:30</span></em></td></tr>
  <tr class="tr3 t_one"><td><a href="u.php?uid-3.html">someone</a></td></tr>
  <tr class="tr3 t_one"><td><a id="a_ajax_11" href="read.php?tid-11.html">Game B</a></td>
      <td class="author"><em>2024-05-02</em></td></tr>
</table>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://forum.example/").unwrap()
    }

    #[test]
    fn listing_url_first_and_later_pages() {
        let adapter = PhpWindAdapter;
        assert_eq!(
            adapter.listing_url(&base(), "19", 1).unwrap().as_str(),
            "https://forum.example/thread.php?fid-19.html"
        );
        assert_eq!(
            adapter.listing_url(&base(), "19", 4).unwrap().as_str(),
            "https://forum.example/thread.php?fid-19-page-4.html"
        );
    }

    #[test]
    fn reads_total_pages_from_pager() {
        let doc = Html::parse_document(LISTING);
        assert_eq!(PhpWindAdapter.total_pages(&doc), 37);

        let bare = Html::parse_document("<html><body></body></html>");
        assert_eq!(PhpWindAdapter.total_pages(&bare), 1);
    }

    #[test]
    fn skips_pinned_rows_above_separator() {
        let doc = Html::parse_document(LISTING);
        let rows = PhpWindAdapter.listing_rows(&doc);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "GameA");
        assert_eq!(rows[0].href, "read.php?tid-10.html");
        assert_eq!(rows[0].posted_at.as_deref(), Some("2024-05-01 12:30"));
        assert_eq!(rows[1].title, "Game B");
        assert_eq!(rows[1].posted_at.as_deref(), Some("2024-05-02"));
    }

    #[test]
    fn falls_back_to_row_class_without_separator() {
        let html = r#"<table>
            <tr class="tr3 t_one"><td><a id="a_ajax_5" href="read.php?tid-5.html">Only</a></td></tr>
            <tr class="tr2"><td><a id="a_ajax_6" href="read.php?tid-6.html">Header</a></td></tr>
        </table>"#;
        let doc = Html::parse_document(html);
        let rows = PhpWindAdapter.listing_rows(&doc);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Only");
        assert!(rows[0].posted_at.is_none());
    }

    #[test]
    fn finds_unlock_button() {
        let html = r#"<div><input type="button" value="Buy"
            onclick="location.href='job.php?action=buytopic&tid=10&pid=tpc'"></div>"#;
        let doc = Html::parse_document(html);
        let url = PhpWindAdapter.unlock_url(&doc, &base()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://forum.example/job.php?action=buytopic&tid=10&pid=tpc"
        );

        let open = Html::parse_document("<div id='read_tpc'>free</div>");
        assert!(PhpWindAdapter.unlock_url(&open, &base()).is_none());
    }

    #[test]
    fn extracts_detail_fields() {
        let html = r#"<html><body>
            <table><tr><th class="r_two"><strong>uploader</strong></th></tr></table>
            <div class="tiptop"><span class="fl gray">2024-05-01 12:30</span></div>
            <div id="read_tpc">Intro <img src="/pics/cover.jpg"><img src="b.png"></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let page = Url::parse("https://forum.example/read.php?tid-10.html").unwrap();
        let detail = PhpWindAdapter.extract_detail(&doc, &page).unwrap();

        assert_eq!(detail.author.as_deref(), Some("uploader"));
        assert_eq!(detail.posted_at.as_deref(), Some("2024-05-01 12:30"));
        assert_eq!(
            detail.cover_url.as_deref(),
            Some("https://forum.example/pics/cover.jpg")
        );
        assert!(detail.content_html.starts_with(r#"<div id="read_tpc">"#));
    }

    #[test]
    fn empty_body_is_not_a_detail() {
        let page = base();
        let blank = Html::parse_document(r#"<div id="read_tpc">   </div>"#);
        assert!(PhpWindAdapter.extract_detail(&blank, &page).is_none());

        let missing = Html::parse_document("<p>login required</p>");
        assert!(PhpWindAdapter.extract_detail(&missing, &page).is_none());
    }
}
