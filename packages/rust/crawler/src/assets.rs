//! Image download and source rewriting for a thread body.

use std::path::Path;
use std::time::Duration;

use scraper::Html;
use tracing::{debug, warn};
use url::Url;

use crate::adapters::selector;
use crate::client::ForumClient;
use threadvault_shared::{Result, ThreadvaultError};

/// Fallback extension when the image URL path has none.
const DEFAULT_EXTENSION: &str = ".jpg";

/// An image that could not be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub url: String,
    pub reason: String,
}

/// Post HTML after image localization.
#[derive(Debug, Clone)]
pub struct LocalizedHtml {
    /// HTML with every saved image pointing at `images/<file>`.
    pub html: String,
    /// File names written under the images directory, in document order.
    pub saved: Vec<String>,
    pub failures: Vec<AssetFailure>,
}

impl LocalizedHtml {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Download every `<img>` in `html` into `images_dir` as `image_<n><ext>`,
/// numbering from 1 in document order, and rewrite the sources that were
/// saved. Individual download failures are collected, not returned.
///
/// The directory is only created when the body has at least one image.
pub async fn localize_images(
    client: &ForumClient,
    html: &str,
    images_dir: &Path,
    timeout: Duration,
) -> Result<LocalizedHtml> {
    let sources = image_sources(html);
    if sources.is_empty() {
        return Ok(LocalizedHtml {
            html: html.to_string(),
            saved: Vec::new(),
            failures: Vec::new(),
        });
    }

    std::fs::create_dir_all(images_dir).map_err(|e| ThreadvaultError::io(images_dir, e))?;

    let mut replacements: Vec<(String, String)> = Vec::new();
    let mut saved = Vec::new();
    let mut failures = Vec::new();

    for (index, src) in sources.into_iter().enumerate() {
        let Some(src) = src else {
            continue;
        };
        let url = match client.resolve(&src) {
            Ok(url) => url,
            Err(e) => {
                failures.push(AssetFailure {
                    url: src,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let file_name = format!("image_{}{}", index + 1, extension_for(&url));
        match download(client, &url, &images_dir.join(&file_name), timeout).await {
            Ok(()) => {
                debug!(%url, file = %file_name, "image saved");
                replacements.push((src, format!("images/{file_name}")));
                saved.push(file_name);
            }
            Err(e) => {
                warn!(%url, error = %e, "image download failed");
                failures.push(AssetFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(LocalizedHtml {
        html: rewrite_sources(html, &replacements),
        saved,
        failures,
    })
}

async fn download(client: &ForumClient, url: &Url, dest: &Path, timeout: Duration) -> Result<()> {
    let bytes = client.get_bytes(url, timeout).await?;
    std::fs::write(dest, &bytes).map_err(|e| ThreadvaultError::io(dest, e))
}

/// `src` of every `<img>` in document order; `None` for images without one.
fn image_sources(html: &str) -> Vec<Option<String>> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&selector("img"))
        .map(|img| {
            img.value()
                .attr("src")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
        .collect()
}

/// Extension of the URL path, dot included, or `.jpg`.
pub fn extension_for(url: &Url) -> String {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Replace each original `src` attribute once, in order. Both the raw and the
/// entity-escaped spelling are tried since serialized HTML escapes `&`.
fn rewrite_sources(html: &str, replacements: &[(String, String)]) -> String {
    let mut out = html.to_string();
    for (original, local) in replacements {
        let target = format!(r#"src="{local}""#);
        for spelling in [escape_attr(original), original.clone()] {
            let pattern = format!(r#"src="{spelling}""#);
            if out.contains(&pattern) {
                out = out.replacen(&pattern, &target, 1);
                break;
            }
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\u{a0}', "&nbsp;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadvault_shared::{AppConfig, CrawlConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tv_assets_{}", uuid::Uuid::now_v7()))
    }

    async fn client_for(server: &MockServer) -> ForumClient {
        let mut config = CrawlConfig::from(&AppConfig::default());
        config.base_url = Url::parse(&format!("{}/", server.uri())).unwrap();
        ForumClient::new(&config).unwrap()
    }

    #[test]
    fn extension_from_path_or_default() {
        let url = Url::parse("https://img.example/a/b/pic.PNG?x=1").unwrap();
        assert_eq!(extension_for(&url), ".png");
        let url = Url::parse("https://img.example/attachment.php?aid=3").unwrap();
        assert_eq!(extension_for(&url), ".php");
        let url = Url::parse("https://img.example/raw/abcdef").unwrap();
        assert_eq!(extension_for(&url), ".jpg");
    }

    #[test]
    fn rewrites_escaped_and_repeated_sources() {
        let html = r#"<img src="a.png?x=1&amp;y=2"><img src="b.png"><img src="b.png">"#;
        let out = rewrite_sources(
            html,
            &[
                ("a.png?x=1&y=2".into(), "images/image_1.png".into()),
                ("b.png".into(), "images/image_2.png".into()),
                ("b.png".into(), "images/image_3.png".into()),
            ],
        );
        assert_eq!(
            out,
            r#"<img src="images/image_1.png"><img src="images/image_2.png"><img src="images/image_3.png">"#
        );
    }

    #[tokio::test]
    async fn no_images_leaves_html_and_disk_untouched() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let dir = temp_dir();
        let out = localize_images(&client, "<div>text only</div>", &dir, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.html, "<div>text only</div>");
        assert!(out.is_complete());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn one_failed_image_of_five() {
        let server = MockServer::start().await;
        for n in [1, 2, 4, 5] {
            Mock::given(method("GET"))
                .and(path(format!("/img/{n}.png")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![n as u8; 8]))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/img/3.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let html: String = (1..=5)
            .map(|n| format!(r#"<img src="img/{n}.png">"#))
            .collect::<Vec<_>>()
            .join("");
        let html = format!(r#"<div id="read_tpc">{html}</div>"#);

        let client = client_for(&server).await;
        let dir = temp_dir().join("images");
        let out = localize_images(&client, &html, &dir, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(out.saved.len(), 4);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].url.ends_with("/img/3.png"));
        assert!(out.html.contains(r#"src="images/image_1.png""#));
        assert!(out.html.contains(r#"src="img/3.png""#));
        assert!(out.html.contains(r#"src="images/image_5.png""#));
        assert!(dir.join("image_4.png").exists());
        assert!(!dir.join("image_3.png").exists());

        let _ = std::fs::remove_dir_all(dir.parent().unwrap());
    }
}
