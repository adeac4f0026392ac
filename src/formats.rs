use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// An extracted article, keyed by the URL it was requested from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    pub domain: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_image_url: Option<String>,
}

/// On-disk layout of `parsed-pages.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub pages: BTreeMap<String, PageRecord>,
}

impl CacheFile {
    pub fn empty(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            timestamp: Utc::now(),
            pages: BTreeMap::new(),
        }
    }
}

/// Only the version tag, so a cache written by another schema can be
/// recognised without deserializing its pages.
#[derive(Debug, Deserialize)]
pub struct CacheHeader {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub date: Option<String>,
}

impl From<&PageRecord> for Chapter {
    fn from(page: &PageRecord) -> Self {
        Self {
            title: page.title.clone(),
            content: page.content.clone(),
            url: Some(page.url.clone()),
            date: page.date_published.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartResult {
    pub part_number: usize,
    pub output_path: PathBuf,
    pub file_size: u64,
    pub chapter_count: usize,
    pub title: String,
}

/// Parses the date formats seen in extractor output and URL lists.
///
/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`; naive
/// values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}
