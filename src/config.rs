use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const DEFAULT_FALLBACK_DOMAIN: &str = "fastfounder.ru";
pub const DEFAULT_FLUSH_EVERY: usize = 5;

/// Knobs for the fetch stage.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Sent with every request in addition to `Cookie` and `User-Agent`.
    pub extra_headers: Vec<(String, String)>,
    /// Pause between two successful fetches.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
    /// Flush the cache after this many new pages; `0` leaves only the
    /// end-of-batch flush.
    pub flush_every: usize,
    /// Domain recorded when the extractor reports none.
    pub fallback_domain: String,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            extra_headers: vec![
                (
                    "Accept".to_owned(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                        .to_owned(),
                ),
                ("Accept-Language".to_owned(), "ru,en;q=0.9".to_owned()),
                ("DNT".to_owned(), "1".to_owned()),
                ("Upgrade-Insecure-Requests".to_owned(), "1".to_owned()),
            ],
            request_delay: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            flush_every: DEFAULT_FLUSH_EVERY,
            fallback_domain: DEFAULT_FALLBACK_DOMAIN.to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    /// Builds the request headers handed to the extractor for every page.
    pub fn request_headers(&self, cookie: &str) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name: {name}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.insert(name, value);
        }

        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent).context("invalid user agent")?,
        );
        if !cookie.is_empty() {
            let mut cookie = HeaderValue::from_str(cookie).context("invalid cookie header")?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }

        Ok(headers)
    }
}
