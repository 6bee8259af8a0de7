//! HTML-to-Markdown conversion and Hexo post rendering.
//!
//! Converts forum post HTML to Markdown using the `htmd` crate, then applies
//! a series of cleanup passes. [`seo`] holds the local metadata rules and
//! [`frontmatter`] the YAML and JSON-LD rendering.

mod cleanup;
pub mod frontmatter;
pub mod seo;

use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use threadvault_shared::{Result, ThreadvaultError};

pub use frontmatter::{
    Document, FrontMatter, StructuredData, escape_yaml_string, front_matter_value,
    split_front_matter,
};
pub use seo::{
    DESCRIPTION_LIMIT, SEO_TITLE_LIMIT, SNIPPET_CHARS, TagRules, add_alt_tags,
    create_meta_description, create_seo_title, extract_tags_from_title, merge_tags,
    metadata_snippet,
};

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("valid regex"));

static SRC_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert post HTML to clean Markdown.
///
/// Tables are turned into pipe tables first, then `htmd` converts the rest and
/// the cleanup pipeline runs. Relative links resolve against `base_url`.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn html_to_markdown(html: &str, base_url: Option<&Url>) -> Result<String> {
    let (html, tables) = preprocess_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript", "svg", "input"])
        .build();

    let mut raw_markdown = converter
        .convert(&html)
        .map_err(|e| ThreadvaultError::Conversion(format!("htmd conversion failed: {e}")))?;

    for (token, table) in &tables {
        raw_markdown = raw_markdown.replace(token, table);
    }

    debug!(
        raw_len = raw_markdown.len(),
        tables = tables.len(),
        "htmd conversion complete"
    );

    Ok(cleanup::run_pipeline(&raw_markdown, base_url))
}

// ---------------------------------------------------------------------------
// Local asset variant
// ---------------------------------------------------------------------------

/// Post HTML with downloaded images swapped for Hexo `asset_img` tags.
#[derive(Debug, Clone)]
pub struct LocalImages {
    html: String,
    tags: Vec<(String, String)>,
    /// Image files referenced by the tags, to be copied next to the post.
    pub files: Vec<String>,
}

impl LocalImages {
    /// Convert to Markdown and substitute the `asset_img` tags.
    pub fn to_markdown(&self, base_url: Option<&Url>) -> Result<String> {
        let mut markdown = html_to_markdown(&self.html, base_url)?;
        for (token, tag) in &self.tags {
            markdown = markdown.replace(token, tag);
        }
        Ok(markdown)
    }
}

/// Replace each `<img src="images/<file>">` whose file `is_available` with a
/// placeholder that becomes `{% asset_img <file> "<alt>" %}` after
/// conversion. The alt text is `{seo_title} - 图{i}`, `i` counting every
/// image from 1.
pub fn localize_image_tags(
    html: &str,
    seo_title: &str,
    is_available: impl Fn(&str) -> bool,
) -> LocalImages {
    let mut index = 0;
    let mut tags = Vec::new();
    let mut files = Vec::new();

    let html = IMG_TAG_RE
        .replace_all(html, |caps: &Captures<'_>| {
            index += 1;
            let tag = &caps[0];
            let file = SRC_ATTR_RE
                .captures(tag)
                .and_then(|s| s.get(1).or_else(|| s.get(2)))
                .and_then(|m| m.as_str().trim().strip_prefix("images/"))
                .map(|f| f.rsplit('/').next().unwrap_or(f).to_string())
                .filter(|f| !f.is_empty() && is_available(f));

            match file {
                Some(file) => {
                    // alphanumeric so htmd passes it through unescaped
                    let token = format!("TVASSETIMG{index}END");
                    let alt = format!("{seo_title} - 图{index}").replace('"', "\\\"");
                    tags.push((token.clone(), format!("{{% asset_img {file} \"{alt}\" %}}")));
                    files.push(file);
                    token
                }
                None => tag.to_string(),
            }
        })
        .into_owned();

    LocalImages { html, tags, files }
}

// ---------------------------------------------------------------------------
// Post assembly
// ---------------------------------------------------------------------------

/// Everything that goes into one Hexo post file.
#[derive(Debug, Clone)]
pub struct HexoPost<'a> {
    pub front_matter: &'a FrontMatter,
    pub original_title: &'a str,
    pub author: &'a str,
    pub publish_date: &'a str,
    pub body: &'a str,
    pub source_url: &'a str,
    pub structured_data: &'a str,
}

/// Front matter, header, body, source footer, then the JSON-LD block.
pub fn render_post(post: &HexoPost<'_>) -> String {
    let mut out = post.front_matter.render();
    out.push('\n');
    out.push_str(&format!(
        "# {}\n\n**{}** - {}\n\n",
        post.original_title, post.author, post.publish_date
    ));
    out.push_str(post.body.trim_end());
    out.push_str(&format!(
        "\n\n---\n\n**Source:** [{}]({})\n",
        post.original_title, post.source_url
    ));
    out.push_str(post.structured_data);
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Swap top-level `<table>` elements for placeholders and return the pipe
/// tables to substitute once htmd has run. htmd collapses the newlines a
/// pipe table needs, so the tables never pass through it.
fn preprocess_tables(html: &str) -> (String, Vec<(String, String)>) {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").expect("valid selector");

    if doc.select(&table_sel).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    // match against the parser's own serialization so replacements line up
    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::new();
    for table_el in doc.select(&table_sel) {
        // nested tables are flattened into their outer table
        if table_el
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .any(|a| a.value().name() == "table")
        {
            continue;
        }
        let token = format!("TVTABLE{}END", tables.len());
        result = result.replacen(&table_el.html(), &format!("<p>{token}</p>"), 1);
        tables.push((token, html_table_to_markdown(&table_el)));
    }

    (result, tables)
}

/// Convert a single HTML table element to a pipe table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let tr_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let mut rows: Vec<Vec<String>> = Vec::new();
    for tr in table.select(&tr_sel) {
        let cells: Vec<String> = tr
            .select(&cell_sel)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::from("\n\n");
    let separator = vec!["---"; col_count].join(" | ");
    for (i, row) in rows.iter().enumerate() {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
        if i == 0 {
            md.push_str(&format!("| {separator} |\n"));
        }
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture_path(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(name)
    }

    fn load_fixture(name: &str) -> String {
        fs::read_to_string(fixture_path(name))
            .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    fn thread_url() -> Url {
        Url::parse("https://forum.example/read.php?tid-2001.html").unwrap()
    }

    #[test]
    fn converts_simple_post() {
        let html = r#"<div id="read_tpc">Hello <b>world</b><br>Second line</div>"#;
        let md = html_to_markdown(html, None).unwrap();
        assert!(md.contains("Hello **world**"));
        assert!(md.contains("Second line"));
        assert!(!md.contains("<div"));
        assert!(md.ends_with('\n'));
    }

    #[test]
    fn drops_scripts_and_buttons() {
        let html = r#"<div>Text<script>alert(1)</script><input type="button" value="Buy"></div>"#;
        let md = html_to_markdown(html, None).unwrap();
        assert!(md.contains("Text"));
        assert!(!md.contains("alert"));
        assert!(!md.contains("Buy"));
    }

    #[test]
    fn converts_tables() {
        let html = r#"<div><table>
            <tr><td>名称</td><td>星之终途</td></tr>
            <tr><td>容量</td><td>3.2G</td></tr>
        </table></div>"#;
        let md = html_to_markdown(html, None).unwrap();
        assert!(md.contains("| 名称 | 星之终途 |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| 容量 | 3.2G |"));
    }

    #[test]
    fn resolves_thread_links() {
        let html = r#"<div><a href="read.php?tid-1.html">prev</a></div>"#;
        let md = html_to_markdown(html, Some(&thread_url())).unwrap();
        assert!(md.contains("[prev](https://forum.example/read.php?tid-1.html)"));
    }

    #[test]
    fn local_images_become_asset_tags() {
        let html = r#"<div><img src="images/image_1.jpg"><img src="https://cdn.example/x.png"><img src="images/image_3.png"></div>"#;
        let local = localize_image_tags(html, r#"Star "HD""#, |file| file == "image_1.jpg");
        assert_eq!(local.files, vec!["image_1.jpg".to_string()]);

        let md = local.to_markdown(None).unwrap();
        assert!(md.contains(r#"{% asset_img image_1.jpg "Star \"HD\" - 图1" %}"#));
        assert!(md.contains("https://cdn.example/x.png"));
        assert!(md.contains("images/image_3.png"));
        assert!(!md.contains("TVASSETIMG"));
    }

    #[test]
    fn renders_full_post() {
        let fm = FrontMatter {
            title: "T".into(),
            seo_title: "S".into(),
            categories: vec!["资源贴".into()],
            date: Some("2024-05-01 12:30:00".into()),
            ..FrontMatter::default()
        };
        let post = render_post(&HexoPost {
            front_matter: &fm,
            original_title: "T",
            author: "uploader",
            publish_date: "2024-05-01 12:30",
            body: "Body text\n",
            source_url: "https://forum.example/read.php?tid-1.html",
            structured_data: "<script type=\"application/ld+json\">\n{}\n</script>",
        });

        assert!(post.starts_with("---\ntitle: \"T\"\n"));
        assert!(post.contains("---\n\n# T\n\n**uploader** - 2024-05-01 12:30\n\nBody text\n\n---\n\n"));
        assert!(post.contains("**Source:** [T](https://forum.example/read.php?tid-1.html)\n<script"));
        assert!(post.ends_with("</script>\n"));
    }

    #[test]
    fn converts_thread_fixture() {
        let html = load_fixture("html/phpwind_thread.html");
        let doc = Html::parse_document(&html);
        let body_sel = Selector::parse("div#read_tpc").unwrap();
        let body = doc.select(&body_sel).next().unwrap().html();

        let with_alts = add_alt_tags(&body, "星之终途");
        let md = html_to_markdown(&with_alts, Some(&thread_url())).unwrap();

        assert!(md.contains("【游戏名称】：星之终途"));
        assert!(md.contains("星之终途 - 图1"));
        assert!(md.contains("星之终途 - 图2"));
        assert!(md.contains("https://img.example.net/covers/star.jpg"));
    }
}
