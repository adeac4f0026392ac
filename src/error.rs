use std::path::PathBuf;

use thiserror::Error;

/// Failures the pipeline reports as distinct conditions rather than as
/// context-wrapped I/O errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither the cache nor the network produced a single page.
    #[error("no pages were fetched or found in the cache")]
    EmptyBatch,

    /// A split was requested for an empty chapter list.
    #[error("no chapters to split into parts")]
    NoChapters,

    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidFilterPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid URL list row {line}: {reason}")]
    InvalidUrlList { line: u64, reason: String },

    #[error("invalid cookie line {line}: expected 7 tab-separated fields, got {fields}")]
    InvalidCookieLine { line: usize, fields: usize },

    #[error("input file is empty: {}", .0.display())]
    EmptyInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
