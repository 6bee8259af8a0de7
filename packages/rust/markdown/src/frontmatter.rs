//! Hexo front matter rendering, parsing, and JSON-LD structured data.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

/// Front matter of a Hexo post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub seo_title: String,
    pub cover: Option<String>,
    pub description: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    /// `YYYY-MM-DD HH:MM:SS`, written unquoted so Hexo parses it as a date.
    pub date: Option<String>,
}

impl FrontMatter {
    /// Render as a `---` delimited YAML block ending in a newline.
    pub fn render(&self) -> String {
        let mut fm = String::from("---\n");
        fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&self.title)));
        fm.push_str(&format!("seo_title: \"{}\"\n", escape_yaml_string(&self.seo_title)));
        if let Some(cover) = self.cover.as_deref().filter(|c| !c.is_empty()) {
            fm.push_str(&format!("cover: \"{}\"\n", escape_yaml_string(cover)));
        }
        fm.push_str(&format!(
            "description: \"{}\"\n",
            escape_yaml_string(&self.description)
        ));
        push_list(&mut fm, "categories", &self.categories);
        push_list(&mut fm, "tags", &self.tags);
        if let Some(date) = &self.date {
            fm.push_str(&format!("date: {date}\n"));
        }
        fm.push_str("---\n");
        fm
    }
}

fn push_list(fm: &mut String, key: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    fm.push_str(key);
    fm.push_str(":\n");
    for item in items {
        fm.push_str(&format!("  - {}\n", yaml_list_item(item)));
    }
}

/// Plain scalar when safe, otherwise a double-quoted string.
fn yaml_list_item(value: &str) -> String {
    const INDICATORS: &[char] = &[
        '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@',
        '`',
    ];
    let needs_quotes = value.is_empty()
        || value.starts_with(INDICATORS)
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value.contains(": ")
        || value.contains(" #")
        || value.ends_with(':')
        || value.contains('\n');
    if needs_quotes {
        format!("\"{}\"", escape_yaml_string(value))
    } else {
        value.to_string()
    }
}

/// Escape a value for a double-quoted YAML scalar.
pub fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

/// A Markdown file split into its front matter and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Document<'a> {
    /// YAML between the `---` fences, if the file has any.
    pub front_matter: Option<&'a str>,
    /// Everything after the closing fence, trimmed.
    pub body: &'a str,
}

/// Split `---\n...\n---\n` front matter off a Markdown file. Files without
/// front matter are all body.
pub fn split_front_matter(content: &str) -> Document<'_> {
    static FRONT_MATTER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*\r?\n(.*)\z").expect("valid regex")
    });

    match FRONT_MATTER_RE.captures(content) {
        Some(caps) => Document {
            front_matter: caps.get(1).map(|m| m.as_str()),
            body: caps.get(2).map_or("", |m| m.as_str().trim()),
        },
        None => Document {
            front_matter: None,
            body: content.trim(),
        },
    }
}

/// Value of a top-level `key: value` line, with double quotes removed.
pub fn front_matter_value(front_matter: &str, key: &str) -> Option<String> {
    front_matter.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?.trim();
        if value.is_empty() {
            return None;
        }
        let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
            None => value.to_string(),
        };
        Some(value)
    })
}

/// Fields of the schema.org `VideoGame` block appended to each post.
#[derive(Debug, Clone)]
pub struct StructuredData<'a> {
    pub seo_title: &'a str,
    pub original_title: &'a str,
    pub cover_url: Option<&'a str>,
    pub description: &'a str,
    pub date_published: &'a str,
    pub author: &'a str,
    pub source_url: &'a str,
}

impl StructuredData<'_> {
    /// `<script type="application/ld+json">` with empty fields omitted.
    pub fn to_script(&self) -> String {
        let schema = json!({
            "@context": "https://schema.org",
            "@type": "VideoGame",
            "name": self.seo_title,
            "alternateName": self.original_title,
            "description": self.description,
            "image": self.cover_url,
            "datePublished": self.date_published,
            "author": { "@type": "Person", "name": self.author },
            "operatingSystem": "Windows",
            "applicationCategory": "GameApplication",
            "url": self.source_url,
        });

        let schema: Map<String, Value> = match schema {
            Value::Object(map) => map
                .into_iter()
                .filter(|(_, v)| match v {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
                .collect(),
            _ => Map::new(),
        };

        let body = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
        format!("<script type=\"application/ld+json\">\n{body}\n</script>")
    }
}
