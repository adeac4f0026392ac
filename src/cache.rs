use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{TimeDelta, Utc};

use crate::formats::{CacheFile, CacheHeader, PageRecord};

pub const CACHE_FORMAT_VERSION: &str = "1.0.0";
pub const CACHE_FILE_NAME: &str = "parsed-pages.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub age: TimeDelta,
}

/// Durable URL → [`PageRecord`] store backing resumable batch runs.
///
/// The whole store lives in memory and is written to a single JSON file on
/// [`PageCache::flush`]. A file that is missing, unreadable or tagged with a
/// different format version is treated as an empty cache.
#[derive(Debug)]
pub struct PageCache {
    path: PathBuf,
    version: String,
    store: Option<CacheFile>,
}

impl PageCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self::with_version(cache_dir, CACHE_FORMAT_VERSION)
    }

    pub fn with_version(cache_dir: impl AsRef<Path>, version: &str) -> Self {
        Self {
            path: cache_dir.as_ref().join(CACHE_FILE_NAME),
            version: version.to_owned(),
            store: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, url: &str) -> Option<&PageRecord> {
        self.store().pages.get(url)
    }

    /// Inserts or replaces the record in memory. Nothing is written until
    /// the next [`PageCache::flush`].
    pub fn set(&mut self, url: impl Into<String>, record: PageRecord) {
        self.store().pages.insert(url.into(), record);
    }

    pub fn has(&mut self, url: &str) -> bool {
        self.store().pages.contains_key(url)
    }

    /// Splits `urls` into those still to fetch and the records already held,
    /// keeping input order in both. Repeated URLs count once, at their first
    /// position.
    pub fn partition(&mut self, urls: &[String]) -> (Vec<String>, Vec<PageRecord>) {
        let store = self.store();
        let mut seen = HashSet::with_capacity(urls.len());
        let mut uncached = Vec::new();
        let mut cached = Vec::new();

        for url in urls {
            if !seen.insert(url.as_str()) {
                continue;
            }
            match store.pages.get(url) {
                Some(record) => cached.push(record.clone()),
                None => uncached.push(url.clone()),
            }
        }

        (uncached, cached)
    }

    /// Overwrites the cache file with the in-memory store.
    ///
    /// A store that was never loaded is left alone so an unused cache cannot
    /// clobber the file with an empty one.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        store.timestamp = Utc::now();

        write_json_atomic(&self.path, store).context("write page cache")?;
        tracing::debug!(
            pages = store.pages.len(),
            path = %self.path.display(),
            "page cache flushed"
        );
        Ok(())
    }

    pub fn stats(&mut self) -> CacheStats {
        let store = self.store();
        CacheStats {
            count: store.pages.len(),
            age: Utc::now().signed_duration_since(store.timestamp),
        }
    }

    /// Empties the store and deletes the cache file if there is one.
    pub fn clear(&mut self) {
        self.store = Some(CacheFile::empty(&self.version));
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "page cache cleared"),
            Err(err) => {
                tracing::debug!(?err, path = %self.path.display(), "no page cache file to remove");
            }
        }
    }

    fn store(&mut self) -> &mut CacheFile {
        let Self {
            path,
            version,
            store,
        } = self;
        store.get_or_insert_with(|| load_store(path, version))
    }
}

fn load_store(path: &Path, version: &str) -> CacheFile {
    match read_store(path, version) {
        Ok(Some(store)) => {
            tracing::debug!(pages = store.pages.len(), "page cache loaded");
            store
        }
        Ok(None) => CacheFile::empty(version),
        Err(err) => {
            tracing::debug!(?err, path = %path.display(), "page cache unreadable; starting empty");
            CacheFile::empty(version)
        }
    }
}

fn read_store(path: &Path, version: &str) -> anyhow::Result<Option<CacheFile>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
    };

    let header: CacheHeader = serde_json::from_slice(&bytes).context("parse cache header")?;
    if header.version != version {
        tracing::debug!(
            found = %header.version,
            expected = version,
            "page cache version mismatch; starting empty"
        );
        return Ok(None);
    }

    let store = serde_json::from_slice(&bytes).context("parse cache pages")?;
    Ok(Some(store))
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
