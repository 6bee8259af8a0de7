//! Paged listing enumeration.
//!
//! [`Enumerator::open`] fetches the first listing page eagerly, because the
//! page count and the first batch of rows both come from it. Later pages are
//! pulled one at a time with [`Enumerator::next_page`] so the caller can start
//! work before the whole forum has been listed.

use std::time::Duration;

use scraper::Html;
use tracing::{debug, info, warn};

use crate::adapters::{ListingRow, SiteAdapter};
use crate::client::ForumClient;
use threadvault_shared::{CrawlConfig, ItemId, Result, WorkItem};

/// Work items found on one listing page.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub page: u32,
    pub items: Vec<WorkItem>,
    /// The page could not be fetched; `items` is empty.
    pub failed: bool,
}

/// Pull-based cursor over a forum's listing pages.
pub struct Enumerator<'a> {
    client: &'a ForumClient,
    adapter: &'a dyn SiteAdapter,
    forum_id: String,
    timeout: Duration,
    page_delay: Duration,
    total_pages: u32,
    next: u32,
    first: Option<Vec<ListingRow>>,
}

impl<'a> Enumerator<'a> {
    /// Fetch page 1 and learn the page count. Failure here aborts the run.
    pub async fn open(
        client: &'a ForumClient,
        adapter: &'a dyn SiteAdapter,
        config: &CrawlConfig,
    ) -> Result<Self> {
        let url = adapter.listing_url(client.base_url(), &config.forum_id, 1)?;
        info!(%url, adapter = adapter.name(), "reading first listing page");

        let body = client.get_text(&url, config.listing_timeout).await?;
        let (total_pages, rows) = parse_listing(adapter, &body);
        info!(total_pages, first_page_rows = rows.len(), "listing opened");

        Ok(Self {
            client,
            adapter,
            forum_id: config.forum_id.clone(),
            timeout: config.listing_timeout,
            page_delay: config.page_delay,
            total_pages,
            next: 1,
            first: Some(rows),
        })
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// Next page of work items, or `None` once every page has been read.
    ///
    /// A page that fails to load is logged and yields an empty, `failed`
    /// batch; enumeration continues with the next page.
    pub async fn next_page(&mut self) -> Option<ListingPage> {
        if self.next > self.total_pages {
            return None;
        }
        let page = self.next;
        self.next += 1;

        if let Some(rows) = self.first.take() {
            return Some(ListingPage {
                page,
                items: rows_to_items(self.client, rows, page),
                failed: false,
            });
        }

        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }

        match self.fetch_rows(page).await {
            Ok(rows) => {
                debug!(page, rows = rows.len(), "listing page read");
                Some(ListingPage {
                    page,
                    items: rows_to_items(self.client, rows, page),
                    failed: false,
                })
            }
            Err(e) => {
                warn!(page, error = %e, "listing page failed, continuing");
                Some(ListingPage {
                    page,
                    items: Vec::new(),
                    failed: true,
                })
            }
        }
    }

    /// Drain every remaining page into one list, in page order.
    pub async fn collect_all(mut self) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            items.extend(page.items);
        }
        items
    }

    async fn fetch_rows(&self, page: u32) -> Result<Vec<ListingRow>> {
        let url = self
            .adapter
            .listing_url(self.client.base_url(), &self.forum_id, page)?;
        let body = self.client.get_text(&url, self.timeout).await?;
        Ok(parse_listing(self.adapter, &body).1)
    }
}

fn parse_listing(adapter: &dyn SiteAdapter, body: &str) -> (u32, Vec<ListingRow>) {
    let doc = Html::parse_document(body);
    (adapter.total_pages(&doc), adapter.listing_rows(&doc))
}

/// Resolve links and derive ids. Rows whose title sanitizes to nothing, or
/// whose link does not resolve, are dropped with a warning.
fn rows_to_items(client: &ForumClient, rows: Vec<ListingRow>, page: u32) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(id) = ItemId::from_title(&row.title) else {
            warn!(title = %row.title, page, "title yields an empty id, skipping row");
            continue;
        };
        let detail_url = match client.resolve(&row.href) {
            Ok(url) => url,
            Err(e) => {
                warn!(title = %row.title, page, error = %e, "unresolvable thread link");
                continue;
            }
        };
        items.push(WorkItem {
            id,
            title: row.title,
            detail_url,
            page,
            posted_at: row.posted_at,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PhpWindAdapter;
    use threadvault_shared::AppConfig;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    /// Matches the raw query string, which carries the phpwind page route.
    struct QueryIs(&'static str);

    impl Match for QueryIs {
        fn matches(&self, request: &Request) -> bool {
            request.url.query() == Some(self.0)
        }
    }

    fn listing(total: u32, titles: &[&str]) -> String {
        let rows: String = titles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    r#"<tr class="tr3 t_one"><td><a id="a_ajax_{i}" href="read.php?tid-{i}.html">{t}</a></td></tr>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><li class="pagesone">1/{total}</li>
            <table><tr><td>普通主题</td></tr>{rows}</table></body></html>"#
        )
    }

    fn config_for(server: &MockServer) -> CrawlConfig {
        let mut config = CrawlConfig::from(&AppConfig::default());
        config.base_url = Url::parse(&format!("{}/", server.uri())).unwrap();
        config.page_delay = Duration::ZERO;
        config
    }

    async fn mount_page(server: &MockServer, query: &'static str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/thread.php"))
            .and(QueryIs(query))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn walks_all_pages_in_order() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "fid-19.html",
            ResponseTemplate::new(200).set_body_string(listing(3, &["A", "B"])),
        )
        .await;
        mount_page(
            &server,
            "fid-19-page-2.html",
            ResponseTemplate::new(200).set_body_string(listing(3, &["C"])),
        )
        .await;
        mount_page(
            &server,
            "fid-19-page-3.html",
            ResponseTemplate::new(200).set_body_string(listing(3, &["D", "??"])),
        )
        .await;

        let config = config_for(&server);
        let client = ForumClient::new(&config).unwrap();
        let enumerator = Enumerator::open(&client, &PhpWindAdapter, &config)
            .await
            .unwrap();
        assert_eq!(enumerator.total_pages(), 3);

        let items = enumerator.collect_all().await;
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "C", "D"]);
        assert_eq!(items[2].page, 2);
        assert!(items[0].detail_url.as_str().ends_with("/read.php?tid-0.html"));
    }

    #[tokio::test]
    async fn failed_page_yields_empty_batch() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "fid-19.html",
            ResponseTemplate::new(200).set_body_string(listing(3, &["A"])),
        )
        .await;
        mount_page(&server, "fid-19-page-2.html", ResponseTemplate::new(500)).await;
        mount_page(
            &server,
            "fid-19-page-3.html",
            ResponseTemplate::new(200).set_body_string(listing(3, &["C"])),
        )
        .await;

        let config = config_for(&server);
        let client = ForumClient::new(&config).unwrap();
        let mut enumerator = Enumerator::open(&client, &PhpWindAdapter, &config)
            .await
            .unwrap();

        let first = enumerator.next_page().await.unwrap();
        assert_eq!(first.items.len(), 1);
        let second = enumerator.next_page().await.unwrap();
        assert!(second.failed);
        assert!(second.items.is_empty());
        let third = enumerator.next_page().await.unwrap();
        assert_eq!(third.items[0].title, "C");
        assert!(enumerator.next_page().await.is_none());
    }

    #[tokio::test]
    async fn first_page_failure_is_fatal() {
        let server = MockServer::start().await;
        mount_page(&server, "fid-19.html", ResponseTemplate::new(403)).await;

        let config = config_for(&server);
        let client = ForumClient::new(&config).unwrap();
        let result = Enumerator::open(&client, &PhpWindAdapter, &config).await;
        assert!(result.is_err());
    }
}
