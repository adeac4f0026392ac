use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use readability_js::{Readability, ReadabilityError, ReadabilityOptions};
use regex::Regex;
use reqwest::header::HeaderMap;
use url::Url;

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid meta tag regex"));
static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid attribute regex")
});
static TIME_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<time\s[^>]*datetime\s*=\s*["']([^"']+)["']"#).expect("valid time regex")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));

/// What an extractor could find on a page. Every field may be missing;
/// defaults are applied later, in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedArticle {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub word_count: Option<u64>,
    pub date_published: Option<String>,
    pub author: Option<String>,
    pub lead_image_url: Option<String>,
}

/// Turns a URL into an article. Implementations do not retry.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, headers: &HeaderMap) -> anyhow::Result<ExtractedArticle>;
}

/// Fetches pages over HTTP and extracts them with readability-js.
#[derive(Debug, Clone)]
pub struct ReadabilityExtractor {
    client: reqwest::Client,
}

impl ReadabilityExtractor {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build extractor http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Extractor for ReadabilityExtractor {
    async fn extract(&self, url: &str, headers: &HeaderMap) -> anyhow::Result<ExtractedArticle> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {url}: unexpected status {status}");
        }

        let page_url = response.url().to_string();
        let html = response.text().await.context("read response body")?;

        // readability-js drives a JS engine; keep it off the async workers.
        tokio::task::spawn_blocking(move || article_from_html(&html, &page_url))
            .await
            .context("join readability task")?
    }
}

/// Runs readability over `html` and fills in the metadata it does not
/// report from the page's `<meta>` tags.
pub fn article_from_html(html: &str, url: &str) -> anyhow::Result<ExtractedArticle> {
    let (title, content) = with_readability(|readability| {
        extract_with_readability(readability, html, url).context("readability extraction")
    })?;
    let meta = PageMeta::scan(html);

    let word_count = count_words(&content);
    Ok(ExtractedArticle {
        title: non_empty(title).or(meta.title),
        content: non_empty(content),
        excerpt: meta.description,
        url: Some(url.to_owned()),
        domain: Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned)),
        word_count: Some(word_count),
        date_published: meta.published,
        author: meta.author,
        lead_image_url: meta.image,
    })
}

thread_local! {
    // One JS engine per blocking worker, built on first use.
    static READABILITY: RefCell<Option<Readability>> = const { RefCell::new(None) };
}

fn with_readability<T>(f: impl FnOnce(&Readability) -> anyhow::Result<T>) -> anyhow::Result<T> {
    READABILITY.with(|slot| {
        let readability = match slot.take() {
            Some(readability) => readability,
            None => Readability::new().context("initialize readability-js")?,
        };
        let result = f(&readability);
        *slot.borrow_mut() = Some(readability);
        result
    })
}

fn extract_with_readability(
    readability: &Readability,
    html: &str,
    url: &str,
) -> Result<(String, String), ReadabilityError> {
    match readability.parse_with_url(html, url) {
        Ok(article) => Ok((article.title, article.content)),
        Err(ReadabilityError::ReadabilityCheckFailed) => {
            let options = ReadabilityOptions::new()
                .char_threshold(0)
                .nb_top_candidates(10)
                .link_density_modifier(2.0);
            let article = readability.parse_with_options(html, Some(url), Some(options))?;
            Ok((article.title, article.content))
        }
        Err(err) => Err(err),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PageMeta {
    title: Option<String>,
    description: Option<String>,
    published: Option<String>,
    author: Option<String>,
    image: Option<String>,
}

impl PageMeta {
    fn scan(html: &str) -> Self {
        let mut by_key: HashMap<String, String> = HashMap::new();
        for tag in META_TAG.find_iter(html) {
            let attrs = parse_attrs(tag.as_str());
            let Some(key) = ["property", "name", "itemprop"]
                .iter()
                .find_map(|attr| attrs.get(*attr))
            else {
                continue;
            };
            let Some(content) = attrs.get("content").and_then(|c| non_empty(c.clone())) else {
                continue;
            };
            by_key.entry(key.to_ascii_lowercase()).or_insert(content);
        }

        let lookup = |keys: &[&str]| keys.iter().find_map(|key| by_key.get(*key).cloned());
        let published = lookup(&[
            "article:published_time",
            "datepublished",
            "og:published_time",
            "pubdate",
            "date",
        ])
        .or_else(|| {
            TIME_DATETIME
                .captures(html)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_owned())
        });

        Self {
            title: lookup(&["og:title", "twitter:title"]),
            description: lookup(&["description", "og:description", "twitter:description"]),
            published,
            author: lookup(&["author", "article:author"]),
            image: lookup(&["og:image", "twitter:image"]),
        }
    }
}

fn parse_attrs(tag: &str) -> HashMap<String, String> {
    TAG_ATTR
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_owned();
            Some((name, value))
        })
        .collect()
}

/// Whitespace-separated words in the text of an HTML fragment.
pub fn count_words(html: &str) -> u64 {
    ANY_TAG.replace_all(html, " ").split_whitespace().count() as u64
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
