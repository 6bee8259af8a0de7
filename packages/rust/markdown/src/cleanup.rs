//! Post-conversion cleanup pipeline for forum post Markdown.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = demote_headings(&result);
    result = strip_leftover_html(&result);
    result = drop_empty_links(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Demote headings
// ---------------------------------------------------------------------------

/// The post header owns the only H1; body H1s become H2.
fn demote_headings(md: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("valid regex"));

    H1_RE.replace_all(md, "## $1").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove presentational tags that survived conversion, keeping their text.
/// Fenced code is left alone.
fn strip_leftover_html(md: &str) -> String {
    let mut result = String::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        if in_code_block || line.trim_start().starts_with("```") {
            result.push_str(line);
        } else {
            result.push_str(&strip_html_tags(line));
        }
        result.push('\n');
    }

    if result.ends_with('\n') {
        result.pop();
    }

    result
}

fn strip_html_tags(line: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)</?(?:div|span|font|center|u|table|tbody|tr|td|th|blockquote)(?:\s[^>]*)?>")
            .expect("valid regex")
    });

    HTML_TAG_RE.replace_all(line, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Drop empty links
// ---------------------------------------------------------------------------

/// `[](url)` left behind by anchors that only wrapped an image.
fn drop_empty_links(md: &str) -> String {
    static EMPTY_LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[^!])\[\]\([^)]*\)").expect("valid regex"));

    EMPTY_LINK_RE.replace_all(md, "$1").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 4: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative link targets against the thread URL. Images and
/// downloaded assets under `images/` keep their relative paths.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let whole = &caps[0];
            let text = &caps[1];
            let href = &caps[2];

            let start = caps.get(0).map_or(0, |m| m.start());
            if start > 0 && md.as_bytes()[start - 1] == b'!' {
                return whole.to_string();
            }

            if href.starts_with("http://")
                || href.starts_with("https://")
                || href.starts_with('#')
                || href.starts_with("mailto:")
                || href.starts_with("magnet:")
                || href.starts_with("images/")
            {
                return whole.to_string();
            }

            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => whole.to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Pass 5: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace and non-breaking spaces left by `&nbsp;` runs.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end_matches(|c: char| c.is_whitespace() || c == '\u{a0}'))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 7: Ensure trailing newline
// ---------------------------------------------------------------------------

fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demote_headings_leaves_h2_alone() {
        let input = "# Intro\n\n## Sub\n\n#hashtag";
        assert_eq!(demote_headings(input), "## Intro\n\n## Sub\n\n#hashtag");
    }

    #[test]
    fn strip_leftover_html_removes_font_tags() {
        let input = "<font color=\"red\">Download</font> here\n<center>mid</center>";
        let result = strip_leftover_html(input);
        assert_eq!(result, "Download here\nmid");
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "Text\n\n```html\n<div>Preserved</div>\n```\n\nText";
        let result = strip_leftover_html(input);
        assert!(result.contains("<div>Preserved</div>"));
    }

    #[test]
    fn drop_empty_links_keeps_images() {
        let input = "[](read.php?tid-1.html) and ![](images/image_1.jpg)";
        assert_eq!(drop_empty_links(input), " and ![](images/image_1.jpg)");
    }

    #[test]
    fn resolve_links_relative_resolved() {
        let base = Url::parse("https://forum.example/read.php?tid-2001.html").unwrap();
        let input = "[Next](read.php?tid-2002.html)";
        assert_eq!(
            resolve_links(input, Some(&base)),
            "[Next](https://forum.example/read.php?tid-2002.html)"
        );
    }

    #[test]
    fn resolve_links_keeps_local_and_absolute() {
        let base = Url::parse("https://forum.example/read.php?tid-1.html").unwrap();
        let input = "![a](images/image_1.jpg) [b](images/image_2.png) [c](https://x.example/) [d](#top)";
        assert_eq!(resolve_links(input, Some(&base)), input);
    }

    #[test]
    fn normalize_whitespace_trims_nbsp() {
        let input = "Line 1 \u{a0}\u{a0}\nLine 2\t";
        assert_eq!(normalize_whitespace(input), "Line 1\nLine 2");
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        assert_eq!(clean_blank_lines("Line 1\n\n\n\n\nLine 2"), "Line 1\n\nLine 2");
        assert_eq!(clean_blank_lines("Line 1\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn ensure_trailing_newline_normalizes() {
        assert_eq!(ensure_trailing_newline("\n\nContent\n\n\n"), "Content\n");
    }

    #[test]
    fn full_pipeline_cleans_markdown() {
        let input = "# Title\n\n\n\n<span>Some content</span>   \n\n[](x.html)\n\n[more](read.php?tid-3.html)";
        let base = Url::parse("https://forum.example/read.php?tid-1.html").unwrap();
        let result = run_pipeline(input, Some(&base));

        assert_eq!(
            result,
            "## Title\n\nSome content\n\n[more](https://forum.example/read.php?tid-3.html)\n"
        );
    }
}
