//! Thread detail fetch, including the pay-to-view unlock dance.

use std::time::Duration;

use scraper::Html;
use tracing::{debug, info};
use url::Url;

use crate::adapters::SiteAdapter;
use crate::client::ForumClient;
use crate::retry::{RetryPolicy, retry_fixed};
use threadvault_shared::{ArticleDetail, Result, ThreadvaultError};

/// Fetch and extract one thread, retrying transient failures per `policy`.
///
/// A gated thread is unlocked by requesting its purchase link and then
/// fetching the page again. A page without a post body is a content error
/// and is never retried.
pub async fn fetch_detail(
    client: &ForumClient,
    adapter: &dyn SiteAdapter,
    url: &Url,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<ArticleDetail> {
    retry_fixed(url.as_str(), policy, move |attempt| async move {
        debug!(%url, attempt, "fetching thread");
        fetch_once(client, adapter, url, timeout).await
    })
    .await
}

async fn fetch_once(
    client: &ForumClient,
    adapter: &dyn SiteAdapter,
    url: &Url,
    timeout: Duration,
) -> Result<ArticleDetail> {
    let mut body = client.get_text(url, timeout).await?;

    if let Some(unlock) = find_unlock(adapter, &body, client.base_url()) {
        info!(%url, unlock = %unlock, "thread is gated, unlocking");
        client.get_text(&unlock, timeout).await?;
        body = client.get_text(url, timeout).await?;
    }

    parse_detail(adapter, &body, url)
}

fn find_unlock(adapter: &dyn SiteAdapter, body: &str, base: &Url) -> Option<Url> {
    let doc = Html::parse_document(body);
    adapter.unlock_url(&doc, base)
}

fn parse_detail(adapter: &dyn SiteAdapter, body: &str, url: &Url) -> Result<ArticleDetail> {
    let doc = Html::parse_document(body);
    adapter
        .extract_detail(&doc, url)
        .ok_or_else(|| ThreadvaultError::content(format!("no post body found at {url}")))
}
