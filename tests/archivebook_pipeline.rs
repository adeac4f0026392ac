use std::fs;
use std::io::Read as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;

const SESSION_COOKIE: &str = "session=abc123";

fn article_html(title: &str, date: &str, paragraphs: &[&str]) -> String {
    let body = paragraphs
        .iter()
        .map(|p| format!("      <p>{p}</p>\n"))
        .collect::<String>();
    format!(
        r#"<!doctype html>
<html>
  <head>
    <title>{title}</title>
    <meta property="article:published_time" content="{date}">
    <meta name="author" content="Site Author">
    <script>window.tracking = true;</script>
  </head>
  <body>
    <nav><a href="/">Home</a></nav>
    <article>
      <h1>{title}</h1>
{body}    </article>
  </body>
</html>
"#
    )
}

fn page_for(path: &str) -> Option<String> {
    let page = match path {
        "/posts/1" => article_html(
            "Oldest post",
            "2023-01-01T09:00:00Z",
            &[
                "The first article explains how the archive was started and why every page is kept.",
                "It carries enough text for the readability pass to treat it as the main content.",
                "A third paragraph keeps the article body comfortably above any length threshold.",
            ],
        ),
        "/posts/2" => article_html(
            "Middle post",
            "2023-02-01T09:00:00Z",
            &[
                "The second article arrives a month later and talks about caching pages on disk.",
                "🎧 Послушать аудиоверсию можно по инструкции. The promo sentence above is removed.",
                "Its closing paragraph wraps up the discussion with a short summary of the month.",
            ],
        ),
        "/posts/3" => article_html(
            "Newest post",
            "2023-03-01T09:00:00Z",
            &[
                "The third article is the newest one and should land at the end of the last part.",
                "It describes splitting long archives into several books of similar size.",
                "Readers can then load each part separately on devices with little memory.",
            ],
        ),
        _ => return None,
    };
    Some(page)
}

fn spawn_site_server(hits: Arc<AtomicUsize>) -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            hits.fetch_add(1, Ordering::SeqCst);

            let has_session = request
                .headers()
                .iter()
                .any(|h| h.field.equiv("Cookie") && h.value.as_str() == SESSION_COOKIE);
            let (status, body) = match (has_session, page_for(request.url())) {
                (false, _) => (403, "login required".to_owned()),
                (true, Some(page)) => (200, page),
                (true, None) => (404, "not found".to_owned()),
            };

            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("build header");
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });

    (base_url, shutdown_tx, handle)
}

fn read_zip_entry(path: &Path, name: &str) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path)?)?;
    let mut entry = archive.by_name(name)?;
    let mut out = String::new();
    entry.read_to_string(&mut out)?;
    Ok(out)
}

fn run_cmd(urls: &Path, cookies: &Path, out: &Path, cache_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("archivebook");
    cmd.env_remove("PAGES_LIMIT")
        .env_remove("EPUB_PARTS")
        .args([
            "run",
            "--urls",
            urls.to_str().unwrap(),
            "--cookies",
            cookies.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
            "--cache-dir",
            cache_dir.to_str().unwrap(),
            "--delay-ms",
            "0",
            "--retry-attempts",
            "2",
            "--retry-delay-ms",
            "10",
            "--title",
            "Test Archive",
        ]);
    cmd
}

#[test]
fn run_writes_parts_and_reuses_cache() -> anyhow::Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let (base_url, shutdown_tx, server_handle) = spawn_site_server(hits.clone());
    let temp = tempfile::TempDir::new()?;

    let urls_path = temp.path().join("urls.csv");
    fs::write(
        &urls_path,
        format!(
            "{base_url}/posts/3,2023-03-01 09:00:00\n{base_url}/posts/1,2023-01-01 09:00:00\n{base_url}/posts/2,2023-02-01 09:00:00\n"
        ),
    )?;
    let cookies_path = temp.path().join("cookies.txt");
    fs::write(
        &cookies_path,
        "# Netscape HTTP Cookie File\n127.0.0.1\tFALSE\t/\tFALSE\t0\tsession\tabc123\n",
    )?;
    let out_path = temp.path().join("books").join("archive.epub");
    let cache_dir = temp.path().join("cache");

    run_cmd(&urls_path, &cookies_path, &out_path, &cache_dir)
        .args(["--parts", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive-part-1.epub"))
        .stdout(predicate::str::contains("archive-part-2.epub"));

    let fetched = hits.load(Ordering::SeqCst);
    assert_eq!(fetched, 3, "each page fetched exactly once");

    let part_1 = temp.path().join("books").join("archive-part-1.epub");
    let part_2 = temp.path().join("books").join("archive-part-2.epub");
    assert!(part_1.exists() && part_2.exists());
    assert!(!out_path.exists());

    let opf_1 = read_zip_entry(&part_1, "OEBPS/content.opf")?;
    assert!(opf_1.contains("<dc:title>Test Archive - Part 1</dc:title>"));
    assert!(opf_1.contains("(Part 1 of 2)"));
    assert!(opf_1.contains("chapter-2"));
    let opf_2 = read_zip_entry(&part_2, "OEBPS/content.opf")?;
    assert!(opf_2.contains("<dc:title>Test Archive - Part 2</dc:title>"));
    assert!(!opf_2.contains("chapter-2"));

    let first_chapter = read_zip_entry(&part_1, "OEBPS/chapter-1.xhtml")?;
    assert!(first_chapter.contains("Oldest post"));
    assert!(first_chapter.contains("January 1, 2023"));
    let last_chapter = read_zip_entry(&part_2, "OEBPS/chapter-1.xhtml")?;
    assert!(last_chapter.contains("Newest post"));

    let cache_json: serde_json::Value =
        serde_json::from_slice(&fs::read(cache_dir.join("parsed-pages.json"))?)?;
    assert_eq!(cache_json["version"], "1.0.0");
    let pages = cache_json["pages"].as_object().expect("pages map");
    assert_eq!(pages.len(), 3);
    let middle = &pages[&format!("{base_url}/posts/2")];
    assert_eq!(middle["date_published"], "2023-02-01T09:00:00Z");
    assert!(!middle["content"].as_str().unwrap_or_default().contains("аудиоверсию"));
    assert!(!middle["content"].as_str().unwrap_or_default().contains("tracking"));

    let _ = shutdown_tx.send(());
    server_handle.join().expect("join server thread");

    // Server is gone: a second run must be served from the cache alone.
    run_cmd(&urls_path, &cookies_path, &out_path, &cache_dir)
        .args(["--parts", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive.epub"));
    assert!(out_path.exists());
    assert_eq!(hits.load(Ordering::SeqCst), fetched);

    let opf = read_zip_entry(&out_path, "OEBPS/content.opf")?;
    assert!(opf.contains("<dc:title>Test Archive</dc:title>"));
    assert!(opf.contains("Collection of 3 articles"));

    Ok(())
}

#[test]
fn run_fails_when_no_page_can_be_fetched() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let urls_path = temp.path().join("urls.csv");
    fs::write(&urls_path, "http://127.0.0.1:9/unreachable,2023-01-01\n")?;
    let cookies_path = temp.path().join("cookies.txt");
    fs::write(&cookies_path, SESSION_COOKIE)?;
    let out_path = temp.path().join("archive.epub");

    run_cmd(&urls_path, &cookies_path, &out_path, &temp.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pages"));
    assert!(!out_path.exists());

    Ok(())
}

#[test]
fn run_rejects_empty_cookie_file() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let urls_path = temp.path().join("urls.csv");
    fs::write(&urls_path, "https://example.com/a,2023-01-01\n")?;
    let cookies_path = temp.path().join("cookies.txt");
    fs::write(&cookies_path, "\n")?;

    run_cmd(
        &urls_path,
        &cookies_path,
        &temp.path().join("archive.epub"),
        &temp.path().join("cache"),
    )
    .assert()
    .failure()
    .stderr(predicate::str::contains("input file is empty"));

    Ok(())
}
