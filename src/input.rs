use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::Error;
use crate::formats::parse_timestamp;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Reads a headerless `url,timestamp` CSV file. See [`parse_url_list`].
pub fn read_url_list(path: &Path, limit: Option<usize>) -> anyhow::Result<Vec<UrlEntry>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read url list: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Err(Error::EmptyInput(path.to_path_buf()).into());
    }

    let entries = parse_url_list(&contents, limit)
        .with_context(|| format!("parse url list: {}", path.display()))?;
    tracing::debug!(entries = entries.len(), path = %path.display(), "url list loaded");
    Ok(entries)
}

/// Parses `url,timestamp` rows, oldest first.
///
/// Every row must carry an absolute URL and a parseable timestamp; extra
/// columns are ignored and blank lines skipped. `limit` keeps the oldest
/// `limit` rows; `Some(0)` means no limit.
pub fn parse_url_list(contents: &str, limit: Option<usize>) -> crate::error::Result<Vec<UrlEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let mut entries = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let fallback_line = idx as u64 + 1;
        let record = record.map_err(|err| Error::InvalidUrlList {
            line: err
                .position()
                .map_or(fallback_line, |position| position.line()),
            reason: err.to_string(),
        })?;
        let line = record
            .position()
            .map_or(fallback_line, |position| position.line());
        let invalid = |reason: String| Error::InvalidUrlList { line, reason };

        let (Some(url), Some(timestamp)) = (record.get(0), record.get(1)) else {
            return Err(invalid(format!("expected `url,timestamp`, got {} field(s)", record.len())));
        };
        Url::parse(url).map_err(|err| invalid(format!("invalid url {url:?}: {err}")))?;
        let timestamp =
            parse_timestamp(timestamp).ok_or_else(|| invalid(format!("invalid timestamp {timestamp:?}")))?;

        entries.push(UrlEntry {
            url: url.to_owned(),
            timestamp,
        });
    }

    entries.sort_by_key(|entry| entry.timestamp);
    if let Some(limit) = limit.filter(|limit| *limit > 0) {
        entries.truncate(limit);
    }
    Ok(entries)
}

/// Reads the cookie file and returns a `Cookie` header value.
pub fn read_cookies(path: &Path) -> anyhow::Result<String> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read cookies: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Err(Error::EmptyInput(path.to_path_buf()).into());
    }

    let cookie = parse_cookies(&contents)
        .with_context(|| format!("parse cookies: {}", path.display()))?;
    tracing::debug!(chars = cookie.len(), "cookie header loaded");
    Ok(cookie)
}

/// Netscape cookie jars become `name=value; ...`; anything else is taken to
/// be a ready-made header value and only trimmed.
pub fn parse_cookies(contents: &str) -> crate::error::Result<String> {
    if !contents.contains(NETSCAPE_HEADER) {
        return Ok(contents.trim().to_owned());
    }

    let mut pairs = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = line.split('\t').collect::<Vec<_>>();
        let &[_domain, _subdomains, _path, _secure, _expires, name, value] = fields.as_slice() else {
            return Err(Error::InvalidCookieLine {
                line: idx + 1,
                fields: fields.len(),
            });
        };
        pairs.push(format!("{name}={value}"));
    }

    tracing::debug!(cookies = pairs.len(), "converted netscape cookie jar");
    Ok(pairs.join("; "))
}
