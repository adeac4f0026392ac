use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::Regex;

use crate::epub::{BookMetadata, CreateEpubOptions, EpubChapter, write_epub};
use crate::formats::{Chapter, PageRecord, PartResult, parse_timestamp};
use crate::partition::split_into_parts;

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img[^>]*/?>").expect("valid img regex"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid whitespace regex"));

/// Sorts `pages` by date, splits them into `part_count` parts and writes one
/// EPUB per part.
///
/// With `part_count <= 1` a single book is written to `base_path` under the
/// base title. Otherwise part `N` of `M` goes to `<stem>-part-N.epub` next to
/// `base_path`, titled `"<title> - Part N"`.
pub fn write_parts(
    pages: &[PageRecord],
    metadata: &BookMetadata,
    base_path: &Path,
    part_count: usize,
    options: &CreateEpubOptions,
) -> anyhow::Result<Vec<PartResult>> {
    let chapters = pages.iter().map(Chapter::from).collect::<Vec<_>>();
    let parts = split_into_parts(chapters, part_count).context("split chapters")?;

    let description = metadata
        .description
        .clone()
        .unwrap_or_else(|| format!("Collection of {} articles", pages.len()));
    let total_parts = parts.len();
    tracing::info!(
        title = %metadata.title,
        pages = pages.len(),
        parts = total_parts,
        "assembling epub"
    );

    let mut plan = Vec::with_capacity(total_parts);
    for (idx, part) in parts.into_iter().enumerate() {
        let part_number = idx + 1;
        let (part_metadata, out_path) = if part_count <= 1 {
            (
                BookMetadata {
                    description: Some(description.clone()),
                    ..metadata.clone()
                },
                base_path.to_path_buf(),
            )
        } else {
            (
                BookMetadata {
                    title: part_title(&metadata.title, part_number),
                    description: Some(part_description(&description, part_number, total_parts)),
                    ..metadata.clone()
                },
                part_output_path(base_path, part_number),
            )
        };

        let epub_chapters = part
            .iter()
            .enumerate()
            .map(|(chapter_idx, chapter)| EpubChapter {
                title: chapter.title.clone(),
                html: strip_images(&chapter.content),
                meta: chapter_meta(chapter),
                author: Some(metadata.author.clone()),
                file_stem: format!("chapter-{}", chapter_idx + 1),
            })
            .collect::<Vec<_>>();
        plan.push((part_number, part_metadata, out_path, epub_chapters));
    }

    // No part is written while any target path is taken.
    if !options.force
        && let Some((_, _, out_path, _)) = plan.iter().find(|(_, _, path, _)| path.exists())
    {
        anyhow::bail!("epub output already exists: {}", out_path.display());
    }

    let mut results = Vec::with_capacity(total_parts);
    for (part_number, part_metadata, out_path, epub_chapters) in plan {
        tracing::info!(
            part = %format!("{part_number}/{total_parts}"),
            chapters = epub_chapters.len(),
            path = %out_path.display(),
            "writing epub part"
        );
        let file_size = write_epub(&part_metadata, &epub_chapters, &out_path, options)
            .with_context(|| format!("write part {part_number}: {}", out_path.display()))?;

        results.push(PartResult {
            part_number,
            output_path: out_path,
            file_size,
            chapter_count: epub_chapters.len(),
            title: part_metadata.title,
        });
    }

    let total_size = results.iter().map(|r| r.file_size).sum::<u64>();
    tracing::info!(
        parts = results.len(),
        chapters = results.iter().map(|r| r.chapter_count).sum::<usize>(),
        size = %format_bytes(total_size),
        "epub parts written"
    );
    Ok(results)
}

pub fn part_title(title: &str, part_number: usize) -> String {
    format!("{title} - Part {part_number}")
}

pub fn part_description(description: &str, part_number: usize, total_parts: usize) -> String {
    format!("{description} (Part {part_number} of {total_parts})")
}

/// `books/archive.epub` becomes `books/archive-part-2.epub`.
pub fn part_output_path(base_path: &Path, part_number: usize) -> PathBuf {
    let name = base_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".epub").unwrap_or(&name);
    base_path.with_file_name(format!("{stem}-part-{part_number}.epub"))
}

fn chapter_meta(chapter: &Chapter) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(date) = chapter.date.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(format_long_date(date));
    }
    if let Some(url) = chapter.url.as_deref() {
        parts.push(url.to_owned());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" • "))
    }
}

/// `2023-01-05T10:00:00Z` → `January 5, 2023`; unparseable input is returned
/// trimmed.
fn format_long_date(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(date) => date.format("%B %-d, %Y").to_string(),
        None => raw.trim().to_owned(),
    }
}

fn strip_images(html: &str) -> String {
    let html = IMG_TAG.replace_all(html, "");
    WHITESPACE_RUN.replace_all(&html, " ").trim().to_owned()
}

/// Human-readable size with binary units: `1536` → `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_owned();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let rounded = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{rounded} {}", UNITS[unit])
}
