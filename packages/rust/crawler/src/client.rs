//! Shared HTTP session for the forum.
//!
//! One [`ForumClient`] is built per run and shared read-only across workers.
//! It carries the logged-in cookie and user agent on every request.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use tracing::{debug, warn};
use url::Url;

use threadvault_shared::{CrawlConfig, Result, ThreadvaultError};

/// Cookie-authenticated HTTP client rooted at the forum base URL.
#[derive(Debug, Clone)]
pub struct ForumClient {
    client: Client,
    base_url: Url,
}

impl ForumClient {
    /// Build the session from the crawl config. The cookie, when present,
    /// is normalized with [`cookie_header`].
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(raw) = config.cookie.as_deref() {
            let cookie = cookie_header(raw)
                .ok_or_else(|| ThreadvaultError::config("cookie string has no name=value pairs"))?;
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| ThreadvaultError::config(format!("invalid cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| {
                ThreadvaultError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Forum root that relative references resolve against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a possibly-relative reference against the forum root.
    pub fn resolve(&self, reference: &str) -> Result<Url> {
        self.base_url
            .join(reference.trim())
            .map_err(|e| ThreadvaultError::validation(format!("bad reference '{reference}': {e}")))
    }

    /// GET `url` and decode the body as UTF-8 (lossy).
    pub async fn get_text(&self, url: &Url, timeout: Duration) -> Result<String> {
        let bytes = self.get_bytes(url, timeout).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// GET `url` and return the raw body.
    pub async fn get_bytes(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreadvaultError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(url, &e))?;
        Ok(body.to_vec())
    }

    /// The underlying client, for collaborators that POST elsewhere.
    pub fn http(&self) -> &Client {
        &self.client
    }
}

fn network_error(url: &Url, e: &reqwest::Error) -> ThreadvaultError {
    if e.is_timeout() {
        ThreadvaultError::Network(format!("{url}: timed out"))
    } else {
        ThreadvaultError::Network(format!("{url}: {e}"))
    }
}

/// Normalize a raw `a=1; b=2` cookie string copied from a browser.
///
/// Blank and malformed segments are dropped. Returns `None` when no
/// `name=value` pair survives.
pub fn cookie_header(raw: &str) -> Option<String> {
    let pairs: Vec<String> = raw
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Some(format!("{}={}", name.trim(), value.trim()))
            }
            _ => {
                warn!(segment = item, "ignoring malformed cookie segment");
                None
            }
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
