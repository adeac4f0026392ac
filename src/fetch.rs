use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::header::HeaderMap;

use crate::cache::PageCache;
use crate::config::FetchConfig;
use crate::extract::{ExtractedArticle, Extractor};
use crate::filter::ContentFilter;
use crate::formats::PageRecord;
use crate::retry::with_retry;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid script regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid style regex"));
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

pub struct PageFetcher {
    extractor: Arc<dyn Extractor>,
    filter: ContentFilter,
    config: FetchConfig,
    headers: HeaderMap,
}

impl PageFetcher {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        filter: ContentFilter,
        config: FetchConfig,
        cookie: &str,
    ) -> anyhow::Result<Self> {
        let headers = config.request_headers(cookie)?;
        Ok(Self {
            extractor,
            filter,
            config,
            headers,
        })
    }

    /// Returns a record for every URL that is cached or could be fetched,
    /// cached records first. URLs that keep failing are logged and left out.
    ///
    /// Only URLs missing from `cache` reach the extractor, one at a time and
    /// in input order. New records go into the cache immediately; the cache
    /// is flushed every `flush_every` new pages and once more at the end.
    pub async fn fetch_batch(&self, cache: &mut PageCache, urls: &[String]) -> Vec<PageRecord> {
        let (uncached, mut pages) = cache.partition(urls);
        tracing::info!(
            total = urls.len(),
            cached = pages.len(),
            to_fetch = uncached.len(),
            "partitioned batch against cache"
        );

        if uncached.is_empty() {
            return pages;
        }

        let total = uncached.len();
        let mut fetched = 0usize;
        let mut failed = 0usize;

        for (idx, url) in uncached.iter().enumerate() {
            let record = match self.fetch_page(url).await {
                Ok(record) => record,
                Err(err) => {
                    failed += 1;
                    tracing::error!(url = %url, error = %format!("{err:#}"), "skipping page after retries");
                    continue;
                }
            };

            tracing::info!(
                progress = %format!("{}/{total}", idx + 1),
                title = %record.title,
                words = record.word_count,
                "fetched page"
            );
            cache.set(url.clone(), record.clone());
            pages.push(record);
            fetched += 1;

            if self.config.flush_every > 0 && fetched % self.config.flush_every == 0 {
                flush_logged(cache, "periodic");
            }

            if idx + 1 < total && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
        }

        flush_logged(cache, "final");
        tracing::info!(fetched, failed, total = pages.len(), "batch complete");
        pages
    }

    /// Fetches one page, retrying with exponential backoff.
    pub async fn fetch_page(&self, url: &str) -> anyhow::Result<PageRecord> {
        with_retry(&self.config.retry, || self.fetch_once(url)).await
    }

    async fn fetch_once(&self, url: &str) -> anyhow::Result<PageRecord> {
        tracing::debug!(url, "extracting page");
        let article = self.extractor.extract(url, &self.headers).await?;
        Ok(normalize_article(
            article,
            url,
            &self.filter,
            &self.config.fallback_domain,
        ))
    }
}

fn flush_logged(cache: &mut PageCache, kind: &str) {
    if let Err(err) = cache.flush() {
        tracing::warn!(kind, error = %format!("{err:#}"), "page cache flush failed; continuing");
    }
}

/// Maps an extractor result onto a [`PageRecord`].
///
/// Title, body and excerpt are entity-decoded; the body is then stripped of
/// scripts, styles and comments and passed through `filter`. Missing word
/// counts become 0, a missing domain becomes `fallback_domain`, and missing
/// author, date or image stay `None`.
pub fn normalize_article(
    article: ExtractedArticle,
    requested_url: &str,
    filter: &ContentFilter,
    fallback_domain: &str,
) -> PageRecord {
    let title = decode(article.title.as_deref().unwrap_or_default());
    let content = clean_html(&decode(article.content.as_deref().unwrap_or_default()));
    let content = filter.filter_content(&content);
    let excerpt = decode(article.excerpt.as_deref().unwrap_or_default());

    PageRecord {
        url: present(article.url).unwrap_or_else(|| requested_url.to_owned()),
        title,
        content,
        excerpt,
        domain: present(article.domain).unwrap_or_else(|| fallback_domain.to_owned()),
        word_count: article.word_count.unwrap_or(0),
        date_published: present(article.date_published),
        author: present(article.author),
        lead_image_url: present(article.lead_image_url),
    }
}

fn decode(raw: &str) -> String {
    html_escape::decode_html_entities(raw).into_owned()
}

fn clean_html(html: &str) -> String {
    let html = SCRIPT_BLOCK.replace_all(html, "");
    let html = STYLE_BLOCK.replace_all(&html, "");
    let html = HTML_COMMENT.replace_all(&html, "");
    WHITESPACE.replace_all(&html, " ").trim().to_owned()
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
