//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and drive the full
//! crawl cycle over real reqwest I/O.

use flate2::write::GzEncoder;
use sitegauge::analyzer::PageReport;
use sitegauge::config::{Config, CrawlConfig, SiteConfig, StorageConfig};
use sitegauge::crawler::{AbortReason, Coordinator, CrawlPhase};
use sitegauge::state::FailureKind;
use sitegauge::storage::{MemoryStorage, SqliteStorage, StorageAdapter};
use sitegauge::transport::ReqwestExchange;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_AGENT: &str = "SitegaugeTest/1.0";

/// Creates a test configuration rooted at the mock server
fn create_test_config(base_url: &str, db_path: &str) -> Config {
    Config {
        crawl: CrawlConfig {
            max_parallel_crawl: 2,
            crawl_delay: 0,
            max_retries: 0,
            request_timeout: 5000,
            max_redirects: 5,
            user_agent: USER_AGENT.to_string(),
            max_external_links: 0,
            retry_backoff: 0,
            max_pages: None,
            max_depth: None,
            checkpoint_interval: None,
        },
        site: SiteConfig {
            root_url: format!("{}/", base_url),
        },
        storage: StorageConfig {
            database_path: db_path.to_string(),
            resume: true,
        },
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

fn page(title: &str, links: &[&str]) -> ResponseTemplate {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
        .collect();
    html(&format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, anchors
    ))
}

fn coordinator(config: &Config, storage: Box<dyn StorageAdapter>) -> Coordinator {
    let exchange = ReqwestExchange::new(USER_AGENT).expect("Failed to build client");
    Coordinator::new(config, Arc::new(exchange), storage).expect("Failed to create coordinator")
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .expect(hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_three_page_crawl() {
    let mock_server = MockServer::start().await;

    mount(
        &mock_server,
        "/",
        page("Home", &["/about", "/contact", "https://external.invalid/"]),
        1,
    )
    .await;
    mount(
        &mock_server,
        "/about",
        page("About", &["/", "/contact", "https://external.invalid/"]),
        1,
    )
    .await;
    mount(
        &mock_server,
        "/contact",
        page("Contact", &["/", "/about", "https://external.invalid/"]),
        1,
    )
    .await;

    let config = create_test_config(&mock_server.uri(), ":memory:");
    let storage = MemoryStorage::new();
    let mut crawl = coordinator(&config, Box::new(storage.clone()));

    let summary = crawl.run().await.expect("Crawl failed");

    assert_eq!(summary.ended_in, CrawlPhase::Draining);
    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(summary.successes, 3);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.external_links_seen, 1);
    assert_eq!(summary.external_probed, 0);
    assert_eq!(summary.queue_remaining, 0);

    let saved = storage.snapshot(crawl.domain()).expect("No snapshot saved");
    assert!(saved.is_complete());
    assert_eq!(saved.stats.len(), 3);
}

#[tokio::test]
async fn test_redirect_loop_is_a_redirect_error() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount(&mock_server, "/", page("Home", &["/a"]), 1).await;
    mount(
        &mock_server,
        "/a",
        ResponseTemplate::new(301).insert_header("location", "/b"),
        1,
    )
    .await;
    mount(
        &mock_server,
        "/b",
        ResponseTemplate::new(302).insert_header("location", format!("{}/a", base_url).as_str()),
        1,
    )
    .await;

    let config = create_test_config(&base_url, ":memory:");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PageReport>();
    let mut crawl = coordinator(&config, Box::new(MemoryStorage::new())).with_report_sink(tx);

    let summary = crawl.run().await.expect("Crawl failed");

    assert_eq!(summary.redirect_errors, 1);
    let bad = crawl.state().bad_requests();
    let failure = &bad[&format!("{}/a", base_url)];
    assert_eq!(failure.kind, FailureKind::RedirectLoop);

    let mut looped = None;
    while let Some(report) = rx.recv().await {
        if report.page.url.ends_with("/a") {
            looped = Some(report);
        }
    }
    let chain = looped.expect("No report for /a").page.redirect_chain;
    assert!(chain.has_loop);
    assert_eq!(chain.hops.len(), 2);
}

#[tokio::test]
async fn test_timeouts_are_retried_then_recorded() {
    let mock_server = MockServer::start().await;

    mount(
        &mock_server,
        "/",
        page("Slow", &[]).set_delay(Duration::from_millis(500)),
        3,
    )
    .await;

    let mut config = create_test_config(&mock_server.uri(), ":memory:");
    config.crawl.request_timeout = 50;
    config.crawl.max_retries = 2;
    config.crawl.max_parallel_crawl = 1;
    let mut crawl = coordinator(&config, Box::new(MemoryStorage::new()));

    let summary = crawl.run().await.expect("Crawl failed");

    assert_eq!(summary.bad_requests, 1);
    let bad = crawl.state().bad_requests();
    let failure = &bad[&format!("{}/", mock_server.uri())];
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.attempts, 3);
}

#[tokio::test]
async fn test_configured_user_agent_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(page("Home", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), ":memory:");
    let mut crawl = coordinator(&config, Box::new(MemoryStorage::new()));

    let summary = crawl.run().await.expect("Crawl failed");
    assert_eq!(summary.successes, 1);
}

#[tokio::test]
async fn test_resume_continues_interrupted_crawl() {
    let mock_server = MockServer::start().await;

    // The root must be fetched once across both runs
    mount(&mock_server, "/", page("Home", &["/page1", "/page2"]), 1).await;
    mount(&mock_server, "/page1", page("Page 1", &[]), 1).await;
    mount(&mock_server, "/page2", page("Page 2", &[]), 1).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let db = db_path.to_str().expect("Non-UTF-8 temp path");

    let mut config = create_test_config(&mock_server.uri(), db);
    config.crawl.max_parallel_crawl = 1;
    config.crawl.max_pages = Some(1);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    let mut first = coordinator(&config, Box::new(storage));
    let summary = first.run().await.expect("First run failed");

    assert_eq!(summary.ended_in, CrawlPhase::Aborted);
    assert_eq!(summary.abort_reason, Some(AbortReason::PageLimit));
    assert_eq!(summary.queue_remaining, 2);

    config.crawl.max_pages = None;
    let storage = SqliteStorage::new(&db_path).expect("Failed to reopen DB");
    let mut second = coordinator(&config, Box::new(storage));
    let summary = second.run().await.expect("Second run failed");

    assert_eq!(summary.ended_in, CrawlPhase::Draining);
    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(summary.queue_remaining, 0);
}

#[tokio::test]
async fn test_telemetry_reaches_page_reports() {
    let mock_server = MockServer::start().await;

    let body = format!(
        "<html><head><title>Home</title></head><body>{}<a href=\"/next\">next</a></body></html>",
        "<p>padding that compresses well</p>".repeat(50)
    );
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    let gzipped = encoder.finish().unwrap();

    mount(
        &mock_server,
        "/",
        ResponseTemplate::new(200)
            .set_body_raw(gzipped.clone(), "text/html")
            .insert_header("content-encoding", "gzip")
            .insert_header("server", "nginx/1.25.3")
            .insert_header("strict-transport-security", "max-age=63072000")
            .insert_header("x-content-type-options", "nosniff")
            .insert_header("cache-control", "public, max-age=600"),
        1,
    )
    .await;
    mount(&mock_server, "/next", page("Next", &[]), 1).await;

    let config = create_test_config(&mock_server.uri(), ":memory:");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PageReport>();
    let mut crawl = coordinator(&config, Box::new(MemoryStorage::new())).with_report_sink(tx);

    let summary = crawl.run().await.expect("Crawl failed");
    assert_eq!(summary.pages_crawled, 2);

    let mut reports = Vec::new();
    while let Some(report) = rx.recv().await {
        reports.push(report);
    }
    let root = reports
        .iter()
        .find(|r| r.page.url == format!("{}/", mock_server.uri()))
        .expect("No report for the root page");

    let compression = root.page.compression.as_ref().unwrap();
    assert!(compression.compressed);
    assert_eq!(compression.encoding.as_deref(), Some("gzip"));
    assert_eq!(compression.transfer_size, gzipped.len());
    assert_eq!(compression.content_size, body.len());

    let caching = root.page.caching.as_ref().unwrap();
    assert_eq!(caching.max_age, Some(600));

    let security = root.page.security_headers.as_ref().unwrap();
    assert_eq!(security.score, 45);

    assert!(root.page.technologies.iter().any(|t| t.name == "Nginx"));
    assert_eq!(root.page.title.as_deref(), Some("Home"));
    assert_eq!(root.page.links_found, 1);
}

#[tokio::test]
async fn test_latin1_site_is_crawled_past_the_root() {
    let mock_server = MockServer::start().await;

    let body = b"<html><head><title>Caf\xe9</title></head><body><a href=\"/next\">Men\xfc</a></body></html>";
    mount(
        &mock_server,
        "/",
        ResponseTemplate::new(200).set_body_raw(body.to_vec(), "text/html; charset=iso-8859-1"),
        1,
    )
    .await;
    mount(&mock_server, "/next", page("Next", &[]), 1).await;

    let config = create_test_config(&mock_server.uri(), ":memory:");
    let mut crawl = coordinator(&config, Box::new(MemoryStorage::new()));

    let summary = crawl.run().await.expect("Crawl failed");

    assert_eq!(summary.pages_crawled, 2);
    assert_eq!(summary.content_errors, 0);
    assert_eq!(summary.successes, 2);
}
