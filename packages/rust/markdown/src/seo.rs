//! Local SEO rules used when no AI metadata is available.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Longest SEO title produced by [`create_seo_title`].
pub const SEO_TITLE_LIMIT: usize = 70;
/// Longest description produced by [`create_meta_description`].
pub const DESCRIPTION_LIMIT: usize = 160;
/// Characters of body text handed to the AI collaborator.
pub const SNIPPET_CHARS: usize = 500;

static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【.*?】|\[.*?\]").expect("valid regex"));

static SIZE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\d.]+G[B|]?.*$").expect("valid regex"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【(.*?)】|\[(.*?)\]").expect("valid regex"));

static SIZE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+(\.\d+)?(gb|g|mb)$").expect("valid regex"));

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("valid regex"));

static ALT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\salt\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

/// Build a title from a forum title: drop bracketed labels and a trailing
/// size suffix like `3.2GB ...`, then cap at `limit` characters, cutting at a
/// space where possible.
pub fn create_seo_title(original_title: &str, limit: usize) -> String {
    let without_labels = BRACKETED_RE.replace_all(original_title, "");
    let cleaned = SIZE_SUFFIX_RE.replace(&without_labels, "").trim().to_string();
    let cleaned = if cleaned.is_empty() {
        original_title.to_string()
    } else {
        cleaned
    };

    if cleaned.chars().count() <= limit {
        return cleaned;
    }

    let head: String = cleaned.chars().take(limit.saturating_sub(3)).collect();
    match head.rfind(' ') {
        Some(pos) => format!("{}...", &head[..pos]),
        None => format!("{head}..."),
    }
}

/// Plain-text description from converted Markdown, capped at `limit`
/// characters on a word boundary.
pub fn create_meta_description(markdown: &str, limit: usize) -> String {
    static MARKUP_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<.*?>|#+\s*|---\s*|\*\*|__").expect("valid regex"));
    static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"!\[.*?\]\(.*?\)|\{%.*?%\}").expect("valid regex")
    });
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[(.*?)\]\(.*?\)").expect("valid regex"));

    let text = IMAGE_RE.replace_all(markdown, "");
    let text = MARKUP_RE.replace_all(&text, "");
    let text = LINK_RE.replace_all(&text, "$1");
    let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        let cut = match head.rfind(' ') {
            Some(pos) => &head[..pos],
            None => head.as_str(),
        };
        text = format!("{cut}...");
    }

    text.replace('"', "“")
}

/// Tag rules applied to titles and AI tags alike.
#[derive(Debug, Clone)]
pub struct TagRules<'a> {
    /// Always added.
    pub extra_tags: &'a [String],
    /// Dropped, compared case-insensitively.
    pub blacklist: &'a [String],
    /// Author placeholder that is never turned into a tag.
    pub unknown_author: &'a str,
}

impl TagRules<'_> {
    fn finish(&self, mut tags: BTreeSet<String>, author: &str) -> Vec<String> {
        tags.extend(self.extra_tags.iter().cloned());
        let author = author.trim();
        if !author.is_empty() && author != self.unknown_author {
            tags.insert(author.to_string());
        }
        tags.into_iter().collect()
    }

    fn is_blacklisted(&self, tag: &str) -> bool {
        let lower = tag.to_lowercase();
        self.blacklist.iter().any(|b| b.to_lowercase() == lower)
    }
}

/// Tags from `【...】` and `[...]` labels in a title, minus blacklisted and
/// size labels, plus the extra tags and the author. Sorted and unique.
pub fn extract_tags_from_title(original_title: &str, author: &str, rules: &TagRules<'_>) -> Vec<String> {
    let tags: BTreeSet<String> = TAG_RE
        .captures_iter(original_title)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| !rules.is_blacklisted(tag) && !SIZE_TAG_RE.is_match(tag))
        .collect();
    rules.finish(tags, author)
}

/// AI tags merged with the extra tags and the author. Sorted and unique.
pub fn merge_tags(ai_tags: &[String], author: &str, rules: &TagRules<'_>) -> Vec<String> {
    let tags: BTreeSet<String> = ai_tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    rules.finish(tags, author)
}

/// Whitespace-collapsed Markdown with `#`, `*` and `-` removed, first
/// [`SNIPPET_CHARS`] characters.
pub fn metadata_snippet(markdown: &str) -> String {
    markdown
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '-'))
        .take(SNIPPET_CHARS)
        .collect()
}

/// Give every `<img>` without a non-empty `alt` the text `{seo_title} - 图{i}`,
/// `i` counting all images from 1.
pub fn add_alt_tags(html: &str, seo_title: &str) -> String {
    let mut index = 0;
    IMG_TAG_RE
        .replace_all(html, |caps: &Captures<'_>| {
            index += 1;
            let tag = &caps[0];
            let existing = ALT_ATTR_RE
                .captures(tag)
                .and_then(|a| a.get(1).or_else(|| a.get(2)))
                .map(|m| m.as_str().trim().to_string());
            if existing.is_some_and(|alt| !alt.is_empty()) {
                return tag.to_string();
            }
            let stripped = ALT_ATTR_RE.replace_all(tag, "");
            let alt = escape_attr(&format!("{seo_title} - 图{index}"));
            // "<img" is 4 bytes and always ASCII
            format!(r#"{} alt="{alt}"{}"#, &stripped[..4], &stripped[4..])
        })
        .into_owned()
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules<'a>(extra: &'a [String], blacklist: &'a [String]) -> TagRules<'a> {
        TagRules {
            extra_tags: extra,
            blacklist,
            unknown_author: "未知作者",
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn seo_title_drops_labels_and_size() {
        assert_eq!(
            create_seo_title("【新作】[ADV] 星之终途 汉化硬盘版 3.2G 附赠CG", SEO_TITLE_LIMIT),
            "星之终途 汉化硬盘版"
        );
    }

    #[test]
    fn seo_title_falls_back_to_original() {
        assert_eq!(create_seo_title("[ADV][汉化]", SEO_TITLE_LIMIT), "[ADV][汉化]");
    }

    #[test]
    fn seo_title_truncates_at_space() {
        let title = "word ".repeat(20);
        let out = create_seo_title(&title, 20);
        assert_eq!(out, "word word word...");
        let solid = "汉".repeat(80);
        let out = create_seo_title(&solid, 70);
        assert_eq!(out.chars().count(), 70);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn description_strips_markdown() {
        let md = "# Title\n\n![cover](images/image_1.jpg)\n\n**Bold** text with a [link](http://x) and \"quotes\".\n\n---\n";
        assert_eq!(
            create_meta_description(md, DESCRIPTION_LIMIT),
            "Title Bold text with a link and “quotes“."
        );
    }

    #[test]
    fn description_truncates_on_word() {
        let md = "alpha beta gamma delta";
        assert_eq!(create_meta_description(md, 13), "alpha beta...");
    }

    #[test]
    fn title_tags_filtered_and_extended() {
        let extra = strings(&["汉化", "GALGAME"]);
        let blacklist = strings(&["自购", "bd"]);
        let tags = extract_tags_from_title(
            "【自购】[ADV][BD][4.5GB] 星之终途【汉化】",
            "uploader",
            &rules(&extra, &blacklist),
        );
        assert_eq!(tags, strings(&["ADV", "GALGAME", "uploader", "汉化"]));
    }

    #[test]
    fn unknown_author_is_not_a_tag() {
        let extra = strings(&["汉化"]);
        let tags = merge_tags(&strings(&["RPG", " RPG ", ""]), "未知作者", &rules(&extra, &[]));
        assert_eq!(tags, strings(&["RPG", "汉化"]));
    }

    #[test]
    fn snippet_is_collapsed_and_capped() {
        let md = "## Head\n\n* item - one\n".repeat(100);
        let snippet = metadata_snippet(&md);
        assert!(snippet.starts_with(" Head  item  one"));
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn alt_tags_fill_missing_only() {
        let html = r#"<p><img src="a.jpg"><img alt="kept" src="b.jpg"><img src="c.jpg" alt=""></p>"#;
        let out = add_alt_tags(html, r#"Star "Ending""#);
        assert_eq!(
            out,
            r#"<p><img alt="Star &quot;Ending&quot; - 图1" src="a.jpg"><img alt="kept" src="b.jpg"><img alt="Star &quot;Ending&quot; - 图3" src="c.jpg"></p>"#
        );
    }
}
