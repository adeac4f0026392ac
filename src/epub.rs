use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use pulldown_cmark::{Options, Parser};
use zip::write::SimpleFileOptions;

/// Book-level metadata shared by every part of a run.
#[derive(Debug, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    pub language: String,
    pub publisher: Option<String>,
    pub cover: Option<PathBuf>,
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            title: "Archive".to_owned(),
            author: "Unknown".to_owned(),
            description: None,
            language: "ru".to_owned(),
            publisher: None,
            cover: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpubChapter {
    pub title: String,
    /// Article body as an HTML fragment.
    pub html: String,
    /// Shown under the heading, e.g. publication date and source URL.
    pub meta: Option<String>,
    pub author: Option<String>,
    /// File name of the chapter document inside the archive, without extension.
    pub file_stem: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateEpubOptions {
    pub force: bool,
}

/// Writes `chapters` as an EPUB 3 book to `out_path` and returns the size of
/// the written file.
pub fn write_epub(
    metadata: &BookMetadata,
    chapters: &[EpubChapter],
    out_path: &Path,
    options: &CreateEpubOptions,
) -> anyhow::Result<u64> {
    if chapters.is_empty() {
        anyhow::bail!("refusing to write an epub without chapters: {}", out_path.display());
    }
    if out_path.exists() && !options.force {
        anyhow::bail!("epub output already exists: {}", out_path.display());
    }
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create epub parent dir: {}", parent.display()))?;
    }

    let lang = metadata.language.trim();
    let lang = if lang.is_empty() { "und" } else { lang };

    let cover = metadata
        .cover
        .as_deref()
        .map(|path| {
            let bytes =
                fs::read(path).with_context(|| format!("read cover: {}", path.display()))?;
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin")
                .to_ascii_lowercase();
            anyhow::Ok(CoverSpec {
                href: format!("cover.{ext}"),
                media_type: media_type_for_asset(path),
                bytes,
            })
        })
        .transpose()?;

    let uuid = uuid::Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let container_xml = render_container_xml();
    let css = default_style_css();
    let nav_xhtml = render_nav_xhtml(&metadata.title, lang, chapters);
    let toc_ncx = render_toc_ncx(&metadata.title, uuid, chapters);
    let content_opf = render_content_opf(metadata, lang, uuid, &modified, chapters, cover.as_ref());

    let mut out_options = OpenOptions::new();
    out_options.write(true);
    if options.force {
        out_options.create(true).truncate(true);
    } else {
        out_options.create_new(true);
    }
    let out_file = out_options
        .open(out_path)
        .with_context(|| format!("open epub output: {}", out_path.display()))?;

    let mut zip = zip::ZipWriter::new(out_file);

    // `mimetype` must be the first entry and stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(b"application/epub+zip")
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for (name, body) in [
        ("META-INF/container.xml", container_xml.as_str()),
        ("OEBPS/content.opf", content_opf.as_str()),
        ("OEBPS/nav.xhtml", nav_xhtml.as_str()),
        ("OEBPS/toc.ncx", toc_ncx.as_str()),
        ("OEBPS/style.css", css),
    ] {
        zip.start_file(name, deflated_options)
            .with_context(|| format!("epub start_file {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("epub write {name}"))?;
    }

    for chapter in chapters {
        let xhtml = wrap_xhtml_document(&chapter.title, lang, &render_chapter_body(chapter));
        zip.start_file(format!("OEBPS/{}.xhtml", chapter.file_stem), deflated_options)
            .with_context(|| format!("epub start_file chapter: {}", chapter.file_stem))?;
        zip.write_all(xhtml.as_bytes())
            .with_context(|| format!("epub write chapter: {}", chapter.file_stem))?;
    }

    if let Some(cover) = &cover {
        zip.start_file(format!("OEBPS/{}", cover.href), deflated_options)
            .context("epub start_file cover")?;
        zip.write_all(&cover.bytes).context("epub write cover")?;
    }

    let file = zip.finish().context("epub finish zip")?;
    let size = file
        .metadata()
        .with_context(|| format!("stat epub output: {}", out_path.display()))?
        .len();
    tracing::debug!(path = %out_path.display(), size, chapters = chapters.len(), "epub written");
    Ok(size)
}

#[derive(Debug)]
struct CoverSpec {
    href: String,
    media_type: &'static str,
    bytes: Vec<u8>,
}

fn render_chapter_body(chapter: &EpubChapter) -> String {
    let mut out = String::new();
    out.push_str(&format!("<h1>{}</h1>\n", xml_escape(&chapter.title)));
    if let Some(meta) = chapter.meta.as_deref().filter(|m| !m.is_empty()) {
        out.push_str(&format!(
            "<div class=\"chapter-meta\">{}</div>\n",
            xml_escape(meta)
        ));
    }
    if let Some(author) = chapter.author.as_deref().filter(|a| !a.is_empty()) {
        out.push_str(&format!(
            "<p class=\"chapter-author\">{}</p>\n",
            xml_escape(author)
        ));
    }
    out.push_str(&html_to_xhtml_fragment(&chapter.html));
    out
}

/// Normalizes arbitrary article HTML into markup that survives an XHTML
/// parser: the fragment is reduced to Markdown and rendered back.
fn html_to_xhtml_fragment(html: &str) -> String {
    let md = html2md::parse_html(html);
    ensure_xhtml_void_tags(&markdown_to_html_fragment(&md))
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> &'static str {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
h1 { font-size: 1.5em; margin: 1em 0 0.3em; }
.chapter-meta { color: #666; font-size: 0.85em; margin-bottom: 1.5em; word-break: break-all; }
.chapter-author { font-style: italic; }
pre, code { font-family: ui-monospace, Menlo, Consolas, monospace; }
pre { overflow-x: auto; padding: 0.75em; background: #f6f8fa; border-radius: 6px; }
blockquote { margin: 1em 0; padding: 0 1em; border-left: 4px solid #ddd; color: #333; }
"#
}

fn render_nav_xhtml(title: &str, lang: &str, chapters: &[EpubChapter]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for ch in chapters {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(&ch.file_stem),
            xml_escape(&ch.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, chapters: &[EpubChapter]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str(&format!(
        "  <docTitle><text>{}</text></docTitle>\n",
        xml_escape(title)
    ));
    out.push_str("  <navMap>\n");
    for (idx, ch) in chapters.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str(&format!(
            "      <navLabel><text>{}</text></navLabel>\n",
            xml_escape(&ch.title)
        ));
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&ch.file_stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    metadata: &BookMetadata,
    lang: &str,
    uuid: uuid::Uuid,
    modified: &str,
    chapters: &[EpubChapter],
    cover: Option<&CoverSpec>,
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{uuid}</dc:identifier>\n"
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&metadata.title)
    ));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(&metadata.author)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(lang)
    ));
    if let Some(description) = &metadata.description {
        out.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(description)
        ));
    }
    if let Some(publisher) = &metadata.publisher {
        out.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            xml_escape(publisher)
        ));
    }
    if cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    if let Some(cover) = cover {
        out.push_str(&format!(
            "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\" />\n",
            xml_escape(&cover.href),
            cover.media_type
        ));
    }
    for ch in chapters {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&ch.file_stem),
            xml_escape(&ch.file_stem)
        ));
    }
    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&ch.file_stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn media_type_for_asset(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn markdown_to_html_fragment(md: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(md, options);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

fn ensure_xhtml_void_tags(html: &str) -> String {
    const VOID_TAGS: &[&str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ];

    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel_lt) = html[cursor..].find('<') {
        let lt = cursor + rel_lt;
        out.push_str(&html[cursor..lt]);

        // Tag end, skipping `>` inside quoted attribute values.
        let mut in_quote: Option<u8> = None;
        let mut gt = lt + 1;
        while gt < bytes.len() {
            let b = bytes[gt];
            match in_quote {
                Some(q) if b == q => in_quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => in_quote = Some(b),
                None if b == b'>' => break,
                None => {}
            }
            gt += 1;
        }
        if gt >= bytes.len() {
            out.push_str(&html[lt..]);
            return out;
        }

        let raw_tag = &html[lt..=gt];
        let name_start = lt + 1;
        let name_end = html[name_start..gt]
            .find(|c: char| !c.is_ascii_alphabetic())
            .map_or(gt, |offset| name_start + offset);
        let tag_name = html[name_start..name_end].to_ascii_lowercase();

        let tag_without_gt = &html[lt..gt];
        if VOID_TAGS.contains(&tag_name.as_str()) && !tag_without_gt.trim_end().ends_with('/') {
            out.push_str(tag_without_gt);
            out.push_str(" />");
        } else {
            out.push_str(raw_tag);
        }

        cursor = gt + 1;
    }

    out.push_str(&html[cursor..]);
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use super::*;

    fn chapter(stem: &str, title: &str, html: &str) -> EpubChapter {
        EpubChapter {
            title: title.to_owned(),
            html: html.to_owned(),
            meta: Some("January 1, 2023 • https://example.com/a".to_owned()),
            author: None,
            file_stem: stem.to_owned(),
        }
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let file = fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn ensure_xhtml_void_tags_preserves_utf8_text() {
        let input = "<p>Проверка текста</p><img src=\"x.png\"><br/><hr>";
        let out = ensure_xhtml_void_tags(input);
        assert!(out.contains("Проверка текста"));
        assert!(out.contains("<img src=\"x.png\" />"));
        assert!(out.contains("<br/>"));
        assert!(out.contains("<hr />"));
    }

    #[test]
    fn write_epub_lays_out_archive() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("books/book.epub");
        let metadata = BookMetadata {
            title: "Archive & Co".to_owned(),
            author: "Jane".to_owned(),
            description: Some("Collection of 2 articles".to_owned()),
            publisher: Some("Self".to_owned()),
            ..BookMetadata::default()
        };
        let chapters = vec![
            chapter("chapter-001", "First", "<p>Hello <b>world</b></p>"),
            chapter("chapter-002", "Second", "<div><p>Line<br>break</p></div>"),
        ];

        let size = write_epub(&metadata, &chapters, &out, &CreateEpubOptions::default()).unwrap();
        assert_eq!(size, fs::metadata(&out).unwrap().len());

        let file = fs::File::open(&out).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), "mimetype");
        drop(archive);

        let opf = read_entry(&out, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Archive &amp; Co</dc:title>"));
        assert!(opf.contains("<dc:creator>Jane</dc:creator>"));
        assert!(opf.contains("<dc:publisher>Self</dc:publisher>"));
        assert!(opf.contains("<itemref idref=\"chapter-002\" />"));

        let first = read_entry(&out, "OEBPS/chapter-001.xhtml");
        assert!(first.contains("<h1>First</h1>"));
        assert!(first.contains("class=\"chapter-meta\""));
        assert!(first.contains("<strong>world</strong>"));

        let second = read_entry(&out, "OEBPS/chapter-002.xhtml");
        assert!(!second.contains("<br>"));
    }

    #[test]
    fn write_epub_refuses_to_overwrite_without_force() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("book.epub");
        fs::write(&out, b"existing").unwrap();
        let chapters = vec![chapter("chapter-001", "Only", "<p>x</p>")];

        let err = write_epub(
            &BookMetadata::default(),
            &chapters,
            &out,
            &CreateEpubOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        write_epub(
            &BookMetadata::default(),
            &chapters,
            &out,
            &CreateEpubOptions { force: true },
        )
        .unwrap();
        assert!(fs::metadata(&out).unwrap().len() > 8);
    }

    #[test]
    fn write_epub_embeds_cover_image() {
        let temp = tempfile::TempDir::new().unwrap();
        let cover = temp.path().join("cover.PNG");
        fs::write(&cover, b"\x89PNG fake").unwrap();
        let out = temp.path().join("book.epub");
        let metadata = BookMetadata {
            cover: Some(cover),
            ..BookMetadata::default()
        };

        write_epub(
            &metadata,
            &[chapter("chapter-001", "Only", "<p>x</p>")],
            &out,
            &CreateEpubOptions::default(),
        )
        .unwrap();

        let opf = read_entry(&out, "OEBPS/content.opf");
        assert!(opf.contains("href=\"cover.png\" media-type=\"image/png\" properties=\"cover-image\""));
    }

    #[test]
    fn write_epub_rejects_empty_chapter_list() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("book.epub");
        assert!(write_epub(&BookMetadata::default(), &[], &out, &CreateEpubOptions::default()).is_err());
        assert!(!out.exists());
    }
}
