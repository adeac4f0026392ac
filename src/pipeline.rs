use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::book::{format_bytes, write_parts};
use crate::cache::PageCache;
use crate::cli::{CacheArgs, RunArgs};
use crate::config::FetchConfig;
use crate::epub::{BookMetadata, CreateEpubOptions};
use crate::error::Error;
use crate::extract::ReadabilityExtractor;
use crate::fetch::PageFetcher;
use crate::filter::ContentFilter;
use crate::input::{read_cookies, read_url_list};
use crate::retry::RetryPolicy;

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let result = run_stages(&args).await;
    match &result {
        Ok(()) => tracing::info!(elapsed = %format_duration(started.elapsed()), "run: done"),
        Err(_) => tracing::error!(elapsed = %format_duration(started.elapsed()), "run: failed"),
    }
    result
}

async fn run_stages(args: &RunArgs) -> anyhow::Result<()> {
    tracing::info!(path = %args.cookies, "run: load cookies");
    let cookie = read_cookies(Path::new(&args.cookies)).context("load cookies")?;

    tracing::info!(path = %args.urls, "run: load url list");
    let entries = read_url_list(Path::new(&args.urls), args.limit).context("load url list")?;
    let urls = entries.into_iter().map(|entry| entry.url).collect::<Vec<_>>();
    tracing::info!(urls = urls.len(), "run: fetch pages");

    let config = FetchConfig {
        user_agent: args.user_agent.clone(),
        request_delay: Duration::from_millis(args.delay_ms),
        retry: RetryPolicy {
            attempts: args.retry_attempts,
            base_delay: Duration::from_millis(args.retry_delay_ms),
        },
        flush_every: args.flush_every,
        fallback_domain: args.fallback_domain.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
        ..FetchConfig::default()
    };
    let extractor = Arc::new(ReadabilityExtractor::new(config.timeout)?);
    let fetcher = PageFetcher::new(extractor, ContentFilter::site_preset(), config, &cookie)
        .context("configure fetcher")?;

    let mut cache = PageCache::new(&args.cache_dir);
    let pages = fetcher.fetch_batch(&mut cache, &urls).await;
    if pages.is_empty() {
        return Err(Error::EmptyBatch.into());
    }

    tracing::info!(pages = pages.len(), parts = args.parts, "run: write epub");
    let metadata = BookMetadata {
        title: args.title.clone(),
        author: args.author.clone(),
        description: args.description.clone(),
        language: args.language.clone(),
        publisher: args.publisher.clone(),
        cover: args.cover.as_ref().map(PathBuf::from),
    };
    let options = CreateEpubOptions { force: args.force };
    let out_path = PathBuf::from(&args.out);
    let parts = tokio::task::block_in_place(|| {
        write_parts(&pages, &metadata, &out_path, args.parts, &options)
    })
    .context("write epub")?;

    let total_size = parts.iter().map(|part| part.file_size).sum::<u64>();
    tracing::info!(
        pages = pages.len(),
        parts = parts.len(),
        size = %format_bytes(total_size),
        "run: summary"
    );
    for part in &parts {
        println!("{}", part.output_path.display());
    }

    Ok(())
}

pub fn clear_cache(args: CacheArgs) -> anyhow::Result<()> {
    let mut cache = PageCache::new(&args.cache_dir);
    cache.clear();
    println!("cleared {}", cache.path().display());
    Ok(())
}

pub fn cache_stats(args: CacheArgs) -> anyhow::Result<()> {
    let mut cache = PageCache::new(&args.cache_dir);
    let stats = cache.stats();
    let age = stats.age.to_std().unwrap_or_default();
    println!("pages: {}", stats.count);
    println!("age: {}", format_duration(age));
    println!("path: {}", cache.path().display());
    Ok(())
}

/// `3725s` → `1h 2m 5s`; sub-second remainders are dropped.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (hours, minutes) = (seconds / 3600, seconds / 60 % 60);
    let seconds = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
