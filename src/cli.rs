use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_FALLBACK_DOMAIN, DEFAULT_FLUSH_EVERY, DEFAULT_USER_AGENT};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every listed page (reusing the cache) and write the EPUB parts.
    Run(RunArgs),
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Headerless CSV file of `url,timestamp` rows.
    #[arg(long)]
    pub urls: String,

    /// Cookie file: a Netscape cookie jar or a raw `Cookie` header value.
    #[arg(long)]
    pub cookies: String,

    /// Output EPUB path. Parts are written next to it as `<stem>-part-N.epub`.
    #[arg(long, default_value = "archive.epub")]
    pub out: String,

    /// Directory holding `parsed-pages.json`.
    #[arg(long, default_value = "./cache")]
    pub cache_dir: String,

    /// Number of EPUB parts to split the chapters into.
    #[arg(long, env = "EPUB_PARTS", default_value_t = 1)]
    pub parts: usize,

    /// Only process the oldest N URLs (0 means all).
    #[arg(long, env = "PAGES_LIMIT")]
    pub limit: Option<usize>,

    /// Delay between two page fetches (politeness).
    #[arg(long, env = "REQUEST_DELAY", default_value_t = 1000)]
    pub delay_ms: u64,

    /// Attempts per page, including the first.
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// Backoff before the first retry; doubled for every further retry.
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Flush the page cache after this many newly fetched pages.
    #[arg(long, default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: usize,

    /// Per-request timeout.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Domain recorded for pages whose extractor result names none.
    #[arg(long, default_value = DEFAULT_FALLBACK_DOMAIN)]
    pub fallback_domain: String,

    /// Book title; parts get a ` - Part N` suffix.
    #[arg(long, default_value = "Archive")]
    pub title: String,

    #[arg(long, default_value = "Unknown")]
    pub author: String,

    /// Book description (default: "Collection of N articles").
    #[arg(long)]
    pub description: Option<String>,

    /// BCP-47 language tag for the book.
    #[arg(long, default_value = "ru")]
    pub language: String,

    #[arg(long)]
    pub publisher: Option<String>,

    /// Cover image (png, jpeg, gif, svg or webp).
    #[arg(long)]
    pub cover: Option<String>,

    /// Overwrite existing EPUB files.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete the page cache.
    Clear(CacheArgs),
    /// Print the number of cached pages and the age of the last flush.
    Stats(CacheArgs),
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Directory holding `parsed-pages.json`.
    #[arg(long, default_value = "./cache")]
    pub cache_dir: String,
}
